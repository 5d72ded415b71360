//! Quarry Core - fluent MySQL query building, execution and result caching
//!
//! Conditions compile to parameterised WHERE clauses, statements run on named
//! connections through a [`Handler`], and select results can be cached until
//! the table they came from is modified.

pub mod binder;
pub mod builder;
pub mod cache;
pub mod compiler;
pub mod condition;
pub mod connection;
pub mod driver;
pub mod error;
pub mod handler;
pub mod operator;
pub mod options;
pub mod pagination;
pub mod result;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use binder::{Fields, IntoFields, PreparedValues};
pub use builder::{ColumnDef, ColumnType, Filter, Group, Query, SchemaBuilder};
pub use cache::{Cache, MemoryCache};
pub use condition::{Condition, ConditionGroup, Connector, IntoCondition, IntoOperand, Operand, Predicate};
pub use connection::{load_config, CacheConfig, ConnectionConfig, Connections, DatabaseConfig};
pub use driver::{Connect, Driver, Outcome, Row};
pub use error::{Error, Result};
pub use handler::Handler;
pub use operator::{op, IntoOperator, Operator};
pub use options::{Aggregate, Join, JoinType, Limit, OrderBy, QueryOptions, Selection, SortDirection};
pub use pagination::{Page, PageSlot, Paginator};
pub use result::ResultSet;
pub use value::{Params, TypeTag, Value};

#[cfg(feature = "mysql")]
pub use driver::mysql::MySqlDriver;
