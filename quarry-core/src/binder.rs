//! Parameter binding: turns ordered column/value lists into clause fragments

use crate::{Error, Params, Result, Value};
use serde::{Deserialize, Serialize};

/// String escaping as performed by the connection's client library
pub trait Escape {
    fn escape(&self, input: &str) -> String;
}

/// Client-side escaping with MySQL's `real_escape_string` rules
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEscape;

impl Escape for MySqlEscape {
    fn escape(&self, input: &str) -> String {
        escape_string(input)
    }
}

/// Escape `input` for inclusion between quotes in a MySQL statement
pub fn escape_string(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\x1a' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Quote a possibly qualified identifier, so `users.id` becomes `` `users`.`id` ``.
///
/// A bare `*` segment is left unquoted so `users.*` keeps working.
pub fn quote_identifier<E: Escape + ?Sized>(escaper: &E, name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            if part == "*" {
                part.to_string()
            } else {
                format!("`{}`", escaper.escape(part).replace('`', "``"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a value as an escaped SQL literal, for statements that cannot carry
/// placeholders.
pub fn literal<E: Escape + ?Sized>(escaper: &E, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::I32(i) => i.to_string(),
        Value::I64(i) => i.to_string(),
        Value::F32(f) => f.to_string(),
        Value::F64(f) => f.to_string(),
        Value::String(s) => format!("'{}'", escaper.escape(s)),
        Value::Json(j) => format!("'{}'", escaper.escape(&j.to_string())),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("X'{}'", hex)
        }
    }
}

/// An ordered list of column/value pairs.
///
/// Order is significant: it decides placeholder order and therefore which
/// value binds where.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value, replacing an earlier value for the same column in place
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
    }

    /// Merge `other` into this list, later values winning
    pub fn merge(&mut self, other: Fields) {
        for (column, value) in other.0 {
            self.insert(column, value);
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// Trait for types that can be converted to an ordered field list
pub trait IntoFields {
    fn into_fields(self) -> Fields;
}

impl IntoFields for Fields {
    fn into_fields(self) -> Fields {
        self
    }
}

impl<K, V> IntoFields for Vec<(K, V)>
where
    K: Into<String>,
    V: Into<Value>,
{
    fn into_fields(self) -> Fields {
        self.into_iter().collect()
    }
}

impl<K, V, const N: usize> IntoFields for [(K, V); N]
where
    K: Into<String>,
    V: Into<Value>,
{
    fn into_fields(self) -> Fields {
        self.into_iter().collect()
    }
}

/// Clause fragments and bound values derived from a field list
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedValues {
    /// `` `a`, `b` ``
    pub columns: String,
    /// `?, ?`
    pub placeholders: String,
    /// `` `a` = ?, `b` = ? ``
    pub assignments: String,
    /// Values in placeholder order, with their type tags
    pub params: Params,
}

impl PreparedValues {
    /// The type tag string, one character per value
    pub fn type_string(&self) -> String {
        self.params.type_string()
    }
}

/// Build the column, placeholder and assignment fragments for `fields`.
///
/// Identifiers are escaped and quoted; values are never interpolated.
pub fn prepare<E: Escape + ?Sized>(escaper: &E, fields: &Fields) -> Result<PreparedValues> {
    if fields.is_empty() {
        return Err(Error::invalid_argument("at least one value is required"));
    }

    let mut columns = Vec::with_capacity(fields.len());
    let mut assignments = Vec::with_capacity(fields.len());
    let mut params = Params::new();

    for (column, value) in fields.iter() {
        if column.trim().is_empty() {
            return Err(Error::invalid_argument("column names cannot be empty"));
        }
        let quoted = quote_identifier(escaper, column);
        assignments.push(format!("{} = ?", quoted));
        columns.push(quoted);
        params.push(value.clone());
    }

    Ok(PreparedValues {
        columns: columns.join(", "),
        placeholders: vec!["?"; fields.len()].join(", "),
        assignments: assignments.join(", "),
        params,
    })
}
