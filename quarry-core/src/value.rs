//! Value types for SQL parameters

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A scalar SQL value that can be bound to a placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// String value
    String(String),
    /// Bytes value
    Bytes(Vec<u8>),
    /// JSON value, bound as its text form
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The bound-parameter type tag for this value
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null | Value::String(_) | Value::Json(_) => TypeTag::String,
            Value::Bool(_) | Value::I32(_) | Value::I64(_) => TypeTag::Integer,
            Value::F32(_) | Value::F64(_) => TypeTag::Double,
            Value::Bytes(_) => TypeTag::Blob,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(i) => Some(i64::from(*i)),
            Value::I64(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(f) => Some(f64::from(*f)),
            Value::F64(f) => Some(*f),
            Value::I32(i) => Some(f64::from(*i)),
            Value::I64(i) => Some(*i as f64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a `serde_json::Value`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::I32(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            Value::I64(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            Value::F32(f) => serde_json::Number::from_f64(f64::from(*f))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::F64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter()
                    .map(|byte| serde_json::Value::Number(serde_json::Number::from(*byte)))
                    .collect(),
            ),
            Value::Json(j) => j.clone(),
        }
    }
}

/// Renders the value as plain text, used for result-set keys and LIKE patterns
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
            Value::I32(i) => write!(f, "{}", i),
            Value::I64(i) => write!(f, "{}", i),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $convert:expr),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from($v: $source) -> Self {
                    $convert
                }
            }
        )*
    };
}

value_from! {
    () => |_unit| Value::Null,
    bool => |b| Value::Bool(b),
    i32 => |i| Value::I32(i),
    u32 => |i| Value::I64(i64::from(i)),
    i64 => |i| Value::I64(i),
    f32 => |v| Value::F32(v),
    f64 => |v| Value::F64(v),
    String => |s| Value::String(s),
    &str => |s| Value::String(s.to_owned()),
    &String => |s| Value::String(s.clone()),
    Vec<u8> => |bytes| Value::Bytes(bytes),
    serde_json::Value => |json| Value::Json(json),
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Bound-parameter type code, one per placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    /// `s`: strings and NULL
    String,
    /// `i`: integers and booleans
    Integer,
    /// `d`: floating point
    Double,
    /// `b`: binary payloads
    Blob,
}

impl TypeTag {
    pub fn as_char(self) -> char {
        match self {
            TypeTag::String => 's',
            TypeTag::Integer => 'i',
            TypeTag::Double => 'd',
            TypeTag::Blob => 'b',
        }
    }
}

/// Ordered bound values together with their type tags.
///
/// Values and tags are always pushed together so the tag string stays aligned
/// with the placeholder order of the statement they belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    values: Vec<Value>,
    tags: Vec<TypeTag>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        let value = value.into();
        self.tags.push(value.type_tag());
        self.values.push(value);
    }

    /// Append another parameter list after this one
    pub fn extend(&mut self, other: Params) {
        self.values.extend(other.values);
        self.tags.extend(other.tags);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.tags
    }

    /// The tag string, e.g. `"sid"`
    pub fn type_string(&self) -> String {
        self.tags.iter().map(|t| t.as_char()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> FromIterator<T> for Params
where
    T: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut params = Params::new();
        for value in iter {
            params.push(value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_creation() {
        assert_eq!(Value::from(42i32), Value::I32(42));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(()), Value::Null);
        assert_eq!(Value::from(7u32), Value::I64(7));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(Some(42i32)), Value::I32(42));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::Null.type_tag(), TypeTag::String);
        assert_eq!(Value::from("x").type_tag(), TypeTag::String);
        assert_eq!(Value::from(1i64).type_tag(), TypeTag::Integer);
        assert_eq!(Value::from(true).type_tag(), TypeTag::Integer);
        assert_eq!(Value::from(1.5f64).type_tag(), TypeTag::Double);
        assert_eq!(Value::from(vec![0u8, 1]).type_tag(), TypeTag::Blob);
        assert_eq!(Value::from(serde_json::json!({"a": 1})).type_tag(), TypeTag::String);
    }

    #[test]
    fn test_params_keep_tags_aligned() {
        let mut params = Params::new();
        params.push("name");
        params.push(3);
        params.push(2.5);
        params.push(Value::Null);
        params.push(vec![1u8]);

        assert_eq!(params.len(), 5);
        assert_eq!(params.type_string(), "sidsb");

        let mut more: Params = vec![1, 2].into_iter().collect();
        more.extend(params);
        assert_eq!(more.type_string(), "iisidsb");
        assert_eq!(more.values()[0], Value::I32(1));
    }

    #[test]
    fn test_display_and_accessors() {
        assert_eq!(Value::from(12i64).to_string(), "12");
        assert_eq!(Value::from(true).to_string(), "1");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from("12").as_i64(), Some(12));
        assert_eq!(Value::from(2i32).as_f64(), Some(2.0));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::I32(42).to_json(), serde_json::json!(42));
        assert_eq!(Value::from("a").to_json(), serde_json::json!("a"));
        assert_eq!(Value::Bytes(vec![1, 2]).to_json(), serde_json::json!([1, 2]));
    }
}
