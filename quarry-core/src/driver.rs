//! Driver boundary: one statement in, rows or an outcome back

use crate::binder::Escape;
use crate::{Params, Result, Value};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A fetched row: column names with their values, in select-list order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, builder style
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// The first column's value, used for scalar queries
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &(String, Value)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Convert to a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Result of a statement that returns no rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// A single live database connection.
///
/// Calls are sequential: one statement is sent, and its response fully read,
/// before the next. An empty parameter list means the statement is sent
/// unprepared, which DDL and transaction control statements rely on.
pub trait Driver: Escape + Send + Sync + 'static {
    /// Execute a statement that returns no rows
    fn execute(&self, sql: &str, params: &Params) -> impl Future<Output = Result<Outcome>> + Send;

    /// Execute a statement and return every row
    fn fetch_all(&self, sql: &str, params: &Params) -> impl Future<Output = Result<Vec<Row>>> + Send;
}

/// Drivers that can be opened from configuration
pub trait Connect: Driver + Sized {
    /// Name used in the `driver` key of a connection's configuration
    const NAME: &'static str;

    fn connect(config: &crate::ConnectionConfig) -> impl Future<Output = Result<Self>> + Send;
}

/// MySQL driver on a single sqlx connection
#[cfg(feature = "mysql")]
pub mod mysql {
    use super::*;
    use crate::binder::escape_string;
    use crate::{ConnectionConfig, Error};
    use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
    use sqlx::query::Query;
    use sqlx::{Column, ConnectOptions, Executor, MySql, Row as _, TypeInfo};
    use tokio::sync::Mutex;

    /// A MySQL connection that serialises statements through a mutex
    pub struct MySqlDriver {
        conn: Mutex<MySqlConnection>,
    }

    impl MySqlDriver {
        /// Wrap an already established connection
        pub fn from_connection(conn: MySqlConnection) -> Self {
            Self {
                conn: Mutex::new(conn),
            }
        }

        /// Connect with a `mysql://` URL
        pub async fn connect_url(url: &str) -> Result<Self> {
            let options: MySqlConnectOptions = url
                .parse()
                .map_err(|e: sqlx::Error| Error::invalid_connection(e.to_string()))?;
            let conn = options
                .connect()
                .await
                .map_err(|e| Error::invalid_connection(e.to_string()))?;
            Ok(Self::from_connection(conn))
        }
    }

    impl Escape for MySqlDriver {
        fn escape(&self, input: &str) -> String {
            escape_string(input)
        }
    }

    impl Connect for MySqlDriver {
        const NAME: &'static str = "mysql";

        async fn connect(config: &ConnectionConfig) -> Result<Self> {
            let mut options = MySqlConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .database(&config.database)
                .charset(&config.charset);
            if let Some(password) = &config.password {
                options = options.password(password);
            }
            if let Some(socket) = &config.socket {
                options = options.socket(socket);
            }

            let conn = options
                .connect()
                .await
                .map_err(|e| Error::invalid_connection(e.to_string()))?;
            Ok(Self::from_connection(conn))
        }
    }

    impl Driver for MySqlDriver {
        async fn execute(&self, sql: &str, params: &Params) -> Result<Outcome> {
            let mut conn = self.conn.lock().await;
            let result = if params.is_empty() {
                conn.execute(sql).await
            } else {
                bind_values_to_query(sqlx::query(sql), params)
                    .execute(&mut *conn)
                    .await
            }
            .map_err(|e| query_error(sql, e))?;

            Ok(Outcome {
                rows_affected: result.rows_affected(),
                last_insert_id: result.last_insert_id(),
            })
        }

        async fn fetch_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
            let mut conn = self.conn.lock().await;
            let rows = if params.is_empty() {
                conn.fetch_all(sql).await
            } else {
                bind_values_to_query(sqlx::query(sql), params)
                    .fetch_all(&mut *conn)
                    .await
            }
            .map_err(|e| query_error(sql, e))?;

            rows.iter().map(|row| decode_row(sql, row)).collect()
        }
    }

    fn query_error(sql: &str, err: sqlx::Error) -> Error {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                Error::invalid_connection(err.to_string())
            }
            sqlx::Error::Database(db) => Error::invalid_query(sql, db.message()),
            other => Error::invalid_query(sql, other.to_string()),
        }
    }

    /// Bind values in placeholder order, following their type tags
    fn bind_values_to_query<'q>(
        mut query: Query<'q, MySql, MySqlArguments>,
        params: &'q Params,
    ) -> Query<'q, MySql, MySqlArguments> {
        for param in params.values() {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::I32(i) => query.bind(*i),
                Value::I64(i) => query.bind(*i),
                Value::F32(f) => query.bind(*f),
                Value::F64(f) => query.bind(*f),
                Value::String(s) => query.bind(s.as_str()),
                Value::Bytes(b) => query.bind(b.as_slice()),
                Value::Json(j) => query.bind(j.to_string()),
            };
        }
        query
    }

    fn decode_row(sql: &str, row: &MySqlRow) -> Result<Row> {
        let mut decoded = Row::new();
        for column in row.columns() {
            let idx = column.ordinal();
            let value = decode_column(row, idx, column.type_info().name())
                .map_err(|e| query_error(sql, e))?;
            decoded.push(column.name(), value);
        }
        Ok(decoded)
    }

    fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
        let value = match type_name {
            "BOOLEAN" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                row.try_get::<Option<i64>, _>(idx)?.map(Value::I64)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(idx)?
                .map(|v| i64::try_from(v).map(Value::I64).unwrap_or_else(|_| Value::String(v.to_string()))),
            "FLOAT" => row.try_get::<Option<f32>, _>(idx)?.map(Value::F32),
            "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(Value::F64),
            "DECIMAL" => row
                .try_get::<Option<rust_decimal::Decimal>, _>(idx)?
                .map(|d| Value::String(d.to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)?
                .map(|d| Value::String(d.to_string())),
            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)?
                .map(|t| Value::String(t.to_string())),
            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
                .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string())),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
            | "GEOMETRY" => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(Value::Bytes),
            "NULL" => None,
            _ => row.try_get_unchecked::<Option<String>, _>(idx)?.map(Value::String),
        };
        Ok(value.unwrap_or(Value::Null))
    }
}
