//! DDL builder: column definitions accumulated for CREATE / ALTER TABLE

use crate::binder::{literal, quote_identifier, Escape};
use crate::driver::Driver;
use crate::handler::Handler;
use crate::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MySQL column types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    Bit(u8),
    Boolean,
    Char(u32),
    VarChar(u32),
    TinyText,
    Text,
    MediumText,
    LongText,
    Binary(u32),
    VarBinary(u32),
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Enum(Vec<String>),
    Set(Vec<String>),
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Json,
}

impl ColumnType {
    /// Text, blob and JSON columns cannot be indexed without a prefix length
    pub fn is_key_eligible(&self) -> bool {
        !matches!(
            self,
            ColumnType::TinyText
                | ColumnType::Text
                | ColumnType::MediumText
                | ColumnType::LongText
                | ColumnType::TinyBlob
                | ColumnType::Blob
                | ColumnType::MediumBlob
                | ColumnType::LongBlob
                | ColumnType::Json
        )
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::MediumInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Decimal { .. }
                | ColumnType::Float
                | ColumnType::Double
        )
    }

    fn to_sql<E: Escape + ?Sized>(&self, escaper: &E) -> String {
        let options = |values: &[String]| {
            values
                .iter()
                .map(|v| literal(escaper, &Value::from(v)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            ColumnType::TinyInt => "TINYINT".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::MediumInt => "MEDIUMINT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Bit(len) => format!("BIT({})", len),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Char(len) => format!("CHAR({})", len),
            ColumnType::VarChar(len) => format!("VARCHAR({})", len),
            ColumnType::TinyText => "TINYTEXT".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::MediumText => "MEDIUMTEXT".to_string(),
            ColumnType::LongText => "LONGTEXT".to_string(),
            ColumnType::Binary(len) => format!("BINARY({})", len),
            ColumnType::VarBinary(len) => format!("VARBINARY({})", len),
            ColumnType::TinyBlob => "TINYBLOB".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
            ColumnType::MediumBlob => "MEDIUMBLOB".to_string(),
            ColumnType::LongBlob => "LONGBLOB".to_string(),
            ColumnType::Enum(values) => format!("ENUM({})", options(values)),
            ColumnType::Set(values) => format!("SET({})", options(values)),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Year => "YEAR".to_string(),
            ColumnType::Json => "JSON".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefault {
    Value(Value),
    CurrentTimestamp,
}

/// One column in a CREATE or ALTER TABLE statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub unsigned: bool,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub auto_increment: bool,
    pub primary: bool,
    /// Secondary (non-unique) index on this column
    pub key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            unsigned: false,
            nullable: false,
            default: None,
            auto_increment: false,
            primary: false,
            key: false,
        }
    }

    /// The column definition without any index clauses
    pub fn to_sql<E: Escape + ?Sized>(&self, escaper: &E) -> String {
        let mut sql = format!(
            "{} {}",
            quote_identifier(escaper, &self.name),
            self.column_type.to_sql(escaper)
        );
        if self.unsigned && self.column_type.is_numeric() {
            sql.push_str(" UNSIGNED");
        }
        sql.push_str(if self.nullable { " NULL" } else { " NOT NULL" });
        match &self.default {
            Some(ColumnDefault::Value(value)) => {
                sql.push_str(" DEFAULT ");
                sql.push_str(&literal(escaper, value));
            }
            Some(ColumnDefault::CurrentTimestamp) => sql.push_str(" DEFAULT CURRENT_TIMESTAMP"),
            None => {}
        }
        if self.auto_increment {
            sql.push_str(" AUTO_INCREMENT");
        }
        sql
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql(&crate::binder::MySqlEscape))
    }
}

/// Assemble `CREATE TABLE` with one primary key and any secondary keys.
///
/// Key flags on text and blob columns are ignored.
pub fn create_table_sql<E: Escape + ?Sized>(escaper: &E, table: &str, columns: &[ColumnDef]) -> Result<String> {
    if table.trim().is_empty() {
        return Err(Error::invalid_argument("table name is required"));
    }
    if columns.is_empty() {
        return Err(Error::invalid_argument(format!(
            "table '{}' needs at least one column",
            table
        )));
    }

    let primary: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary).collect();
    if primary.len() > 1 {
        return Err(Error::invalid_schema(format!(
            "table '{}' declares {} primary keys",
            table,
            primary.len()
        )));
    }

    let mut parts: Vec<String> = columns.iter().map(|c| c.to_sql(escaper)).collect();
    if let Some(pk) = primary.first() {
        parts.push(format!("PRIMARY KEY ({})", quote_identifier(escaper, &pk.name)));
    }
    for column in columns
        .iter()
        .filter(|c| c.key && !c.primary && c.column_type.is_key_eligible())
    {
        let name = quote_identifier(escaper, &column.name);
        parts.push(format!("KEY {} ({})", name, name));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(escaper, table),
        parts.join(", ")
    ))
}

/// Chainable table definition bound to a handler.
///
/// Column modifiers (`nullable`, `default`, `primary`, ...) apply to the
/// column added last.
pub struct SchemaBuilder<D: Driver> {
    handler: Handler<D>,
    table: String,
    columns: Vec<ColumnDef>,
    error: Option<Error>,
}

macro_rules! column_methods {
    ($($(#[$doc:meta])* $method:ident => $ty:expr),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $method(self, field: &str) -> Self {
                self.column(field, $ty)
            }
        )*
    };
}

impl<D: Driver> SchemaBuilder<D> {
    pub fn new(handler: Handler<D>, table: impl Into<String>) -> Self {
        Self {
            handler,
            table: table.into(),
            columns: Vec::new(),
            error: None,
        }
    }

    /// Add a column of any type
    pub fn column(mut self, field: &str, column_type: ColumnType) -> Self {
        if field.trim().is_empty() {
            self.defer(Error::invalid_argument(format!(
                "a field name is required for {} columns",
                column_type
            )));
        } else {
            self.columns.push(ColumnDef::new(field, column_type));
        }
        self
    }

    column_methods! {
        tiny_int => ColumnType::TinyInt,
        small_int => ColumnType::SmallInt,
        medium_int => ColumnType::MediumInt,
        int => ColumnType::Int,
        big_int => ColumnType::BigInt,
        float => ColumnType::Float,
        double => ColumnType::Double,
        boolean => ColumnType::Boolean,
        tiny_text => ColumnType::TinyText,
        text => ColumnType::Text,
        medium_text => ColumnType::MediumText,
        long_text => ColumnType::LongText,
        tiny_blob => ColumnType::TinyBlob,
        blob => ColumnType::Blob,
        medium_blob => ColumnType::MediumBlob,
        long_blob => ColumnType::LongBlob,
        date => ColumnType::Date,
        date_time => ColumnType::DateTime,
        timestamp => ColumnType::Timestamp,
        time => ColumnType::Time,
        year => ColumnType::Year,
        json => ColumnType::Json,
        /// `CHAR(1)`; change the width with `length`
        char => ColumnType::Char(1),
        /// `VARCHAR(255)`; change the width with `length`
        var_char => ColumnType::VarChar(255),
        binary => ColumnType::Binary(1),
        var_binary => ColumnType::VarBinary(255),
        bit => ColumnType::Bit(1),
    }

    /// `DECIMAL(precision, scale)`
    pub fn decimal(self, field: &str, precision: u8, scale: u8) -> Self {
        self.column(field, ColumnType::Decimal { precision, scale })
    }

    pub fn enum_(self, field: &str, values: &[&str]) -> Self {
        self.column(field, ColumnType::Enum(values.iter().map(|v| v.to_string()).collect()))
    }

    pub fn set(self, field: &str, values: &[&str]) -> Self {
        self.column(field, ColumnType::Set(values.iter().map(|v| v.to_string()).collect()))
    }

    /// `id INT UNSIGNED NOT NULL AUTO_INCREMENT` as the primary key
    pub fn auto_id(self) -> Self {
        self.int("id").unsigned().auto_increment().primary()
    }

    /// Width of the last character, binary or bit column
    pub fn length(self, length: u32) -> Self {
        self.modify("length", |column| {
            column.column_type = match &column.column_type {
                ColumnType::Char(_) => ColumnType::Char(length),
                ColumnType::VarChar(_) => ColumnType::VarChar(length),
                ColumnType::Binary(_) => ColumnType::Binary(length),
                ColumnType::VarBinary(_) => ColumnType::VarBinary(length),
                ColumnType::Bit(_) => ColumnType::Bit(u8::try_from(length).map_err(|_| {
                    Error::invalid_argument(format!("bit width {} is out of range", length))
                })?),
                other => {
                    return Err(Error::invalid_argument(format!(
                        "{} columns have no length",
                        other
                    )))
                }
            };
            Ok(())
        })
    }

    pub fn unsigned(self) -> Self {
        self.modify("unsigned", |column| {
            column.unsigned = true;
            Ok(())
        })
    }

    pub fn nullable(self) -> Self {
        self.modify("nullable", |column| {
            column.nullable = true;
            Ok(())
        })
    }

    pub fn default(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.modify("default", move |column| {
            column.default = Some(ColumnDefault::Value(value));
            Ok(())
        })
    }

    pub fn default_current_timestamp(self) -> Self {
        self.modify("default_current_timestamp", |column| {
            column.default = Some(ColumnDefault::CurrentTimestamp);
            Ok(())
        })
    }

    pub fn auto_increment(self) -> Self {
        self.modify("auto_increment", |column| {
            column.auto_increment = true;
            Ok(())
        })
    }

    pub fn primary(self) -> Self {
        self.modify("primary", |column| {
            column.primary = true;
            Ok(())
        })
    }

    /// Add a secondary index on the last column
    pub fn key(self) -> Self {
        self.modify("key", |column| {
            column.key = true;
            Ok(())
        })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Create the table
    pub async fn create(self) -> Result<()> {
        let (handler, table, columns) = self.finish()?;
        handler.create(&table, &columns).await
    }

    /// Add the accumulated columns to the existing table
    pub async fn add(self) -> Result<()> {
        let (handler, table, columns) = self.finish()?;
        handler.add_field(&table, &columns).await
    }

    /// Replace the definition of `field` with the single accumulated column
    pub async fn alter(self, field: &str) -> Result<()> {
        let (handler, table, columns) = self.finish()?;
        match columns.as_slice() {
            [column] => handler.alter_field(&table, field, column).await,
            _ => Err(Error::invalid_argument(format!(
                "altering '{}' needs exactly one column definition, got {}",
                field,
                columns.len()
            ))),
        }
    }

    fn finish(self) -> Result<(Handler<D>, String, Vec<ColumnDef>)> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.table.trim().is_empty() {
            return Err(Error::invalid_argument("table name is required"));
        }
        if self.columns.is_empty() {
            return Err(Error::invalid_argument(format!(
                "table '{}' needs at least one column",
                self.table
            )));
        }
        Ok((self.handler, self.table, self.columns))
    }

    fn modify<F>(mut self, modifier: &str, apply: F) -> Self
    where
        F: FnOnce(&mut ColumnDef) -> Result<()>,
    {
        let result = match self.columns.last_mut() {
            Some(column) => apply(column),
            None => Err(Error::invalid_argument(format!(
                "'{}' needs a column to modify",
                modifier
            ))),
        };
        if let Err(e) = result {
            self.defer(e);
        }
        self
    }

    fn defer(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::MySqlEscape;
    use crate::testing::RecordingDriver;
    use crate::Connections;
    use std::sync::Arc;

    async fn handler() -> (Handler<RecordingDriver>, RecordingDriver) {
        let driver = RecordingDriver::new();
        let connections = Connections::new();
        connections.add("main", driver.clone()).await.unwrap();
        (Handler::new(Arc::new(connections)), driver)
    }

    #[test]
    fn test_column_sql() {
        let column = ColumnDef {
            unsigned: true,
            default: Some(ColumnDefault::Value(Value::from(0))),
            ..ColumnDef::new("stock", ColumnType::Int)
        };
        assert_eq!(column.to_sql(&MySqlEscape), "`stock` INT UNSIGNED NOT NULL DEFAULT 0");

        let column = ColumnDef::new("status", ColumnType::Enum(vec!["on".into(), "o'ff".into()]));
        assert_eq!(column.to_sql(&MySqlEscape), "`status` ENUM('on', 'o\\'ff') NOT NULL");
    }

    #[test]
    fn test_create_table_keys() {
        let columns = vec![
            ColumnDef {
                unsigned: true,
                auto_increment: true,
                primary: true,
                ..ColumnDef::new("id", ColumnType::Int)
            },
            ColumnDef {
                key: true,
                ..ColumnDef::new("email", ColumnType::VarChar(191))
            },
            ColumnDef {
                key: true,
                nullable: true,
                ..ColumnDef::new("bio", ColumnType::Text)
            },
        ];
        assert_eq!(
            create_table_sql(&MySqlEscape, "users", &columns).unwrap(),
            "CREATE TABLE IF NOT EXISTS `users` (`id` INT UNSIGNED NOT NULL AUTO_INCREMENT, \
             `email` VARCHAR(191) NOT NULL, `bio` TEXT NULL, PRIMARY KEY (`id`), KEY `email` (`email`))"
        );
    }

    #[test]
    fn test_single_primary_key() {
        let columns = vec![
            ColumnDef {
                primary: true,
                ..ColumnDef::new("a", ColumnType::Int)
            },
            ColumnDef {
                primary: true,
                ..ColumnDef::new("b", ColumnType::Int)
            },
        ];
        let err = create_table_sql(&MySqlEscape, "t", &columns).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[tokio::test]
    async fn test_builder_creates_table() {
        let (handler, driver) = handler().await;
        handler
            .schema("t")
            .auto_id()
            .var_char("name")
            .length(64)
            .key()
            .timestamp("created_at")
            .default_current_timestamp()
            .create()
            .await
            .unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "CREATE TABLE IF NOT EXISTS `t` (`id` INT UNSIGNED NOT NULL AUTO_INCREMENT, \
                 `name` VARCHAR(64) NOT NULL, `created_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                 PRIMARY KEY (`id`), KEY `name` (`name`))"
            ]
        );
    }

    #[tokio::test]
    async fn test_builder_requires_field_and_columns() {
        let (handler, driver) = handler().await;

        let err = handler.schema("t").var_char("").create().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = handler.schema("t").create().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = handler.schema("").int("a").create().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = handler.schema("t").nullable().int("a").create().await.unwrap_err();
        assert!(err.to_string().contains("nullable"));

        let err = handler.schema("t").int("a").length(4).create().await.unwrap_err();
        assert!(err.to_string().contains("no length"));

        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_alter() {
        let (handler, driver) = handler().await;
        handler.schema("t").int("age").nullable().add().await.unwrap();
        handler.schema("t").big_int("age").alter("age").await.unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "ALTER TABLE `t` ADD COLUMN `age` INT NULL",
                "ALTER TABLE `t` CHANGE `age` `age` BIGINT NOT NULL",
            ]
        );

        let err = handler.schema("t").int("a").int("b").alter("a").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
