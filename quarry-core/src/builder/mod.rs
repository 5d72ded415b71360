//! Query builder module

pub mod filter;
pub mod query;
pub mod schema;

// Re-export types from submodules
pub use filter::{Filter, Group};
pub use query::Query;
pub use schema::{ColumnDef, ColumnDefault, ColumnType, SchemaBuilder};
