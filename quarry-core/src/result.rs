//! Keyed result sets

use crate::driver::Row;
use crate::{Result, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Rows returned by a select, each under a key.
///
/// Keys are primary-key values when the table has a primary key, the query
/// has no joins and every row carries the key column; otherwise they are
/// sequential indexes starting at `0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    rows: Vec<(String, Row)>,
}

impl ResultSet {
    /// Key rows by position
    pub fn indexed(rows: Vec<Row>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .enumerate()
                .map(|(idx, row)| (idx.to_string(), row))
                .collect(),
        }
    }

    /// Key rows by the value of `column`, falling back to positions when any
    /// row lacks it
    pub fn keyed_by(rows: Vec<Row>, column: &str) -> Self {
        let keys: Option<Vec<String>> = rows
            .iter()
            .map(|row| row.get(column).filter(|v| !v.is_null()).map(Value::to_string))
            .collect();
        match keys {
            Some(keys) => Self {
                rows: keys.into_iter().zip(rows).collect(),
            },
            None => Self::indexed(rows),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.rows.iter().find(|(k, _)| k == key).map(|(_, row)| row)
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first().map(|(_, row)| row)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|(k, _)| k.as_str())
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|(_, row)| row)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Row)> {
        self.rows.iter().map(|(k, row)| (k.as_str(), row))
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows.into_iter().map(|(_, row)| row).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Deserialize every row into `T`, matching columns to fields by name
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows()
            .map(|row| Ok(serde_json::from_value(row.to_json())?))
            .collect()
    }
}
