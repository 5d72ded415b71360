//! SQL operator types and conversions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Comparison operator of a condition leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// MySQL's NULL-safe equality `<=>`
    NullSafeEq,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parse an operator written the way it appears in SQL.
    ///
    /// # Examples
    /// ```
    /// use quarry_core::Operator;
    ///
    /// assert_eq!(Operator::parse(">=").unwrap(), Operator::Gte);
    /// assert_eq!(Operator::parse("not in").unwrap(), Operator::NotIn);
    /// assert!(Operator::parse("; DROP").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "<=>" => Ok(Operator::NullSafeEq),
            "LIKE" => Ok(Operator::Like),
            "NOT LIKE" => Ok(Operator::NotLike),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            "IS NULL" => Ok(Operator::IsNull),
            "IS NOT NULL" => Ok(Operator::IsNotNull),
            _ => Err(Error::invalid_argument(format!(
                "unknown operator '{}'",
                input
            ))),
        }
    }

    /// Get the SQL representation of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::NullSafeEq => "<=>",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Plain binary comparisons that take exactly one bound value
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Gt
                | Operator::Gte
                | Operator::Lt
                | Operator::Lte
                | Operator::NullSafeEq
        )
    }
}

impl Default for Operator {
    fn default() -> Self {
        Operator::Eq
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for types that can be converted to SQL operators
pub trait IntoOperator {
    fn into_operator(self) -> Result<Operator>;
}

impl IntoOperator for Operator {
    fn into_operator(self) -> Result<Operator> {
        Ok(self)
    }
}

impl IntoOperator for &str {
    fn into_operator(self) -> Result<Operator> {
        Operator::parse(self)
    }
}

/// Convenience module for operator constants
pub mod op {
    use super::Operator;

    pub const EQ: Operator = Operator::Eq;
    pub const NEQ: Operator = Operator::NotEq;
    pub const GT: Operator = Operator::Gt;
    pub const GTE: Operator = Operator::Gte;
    pub const LT: Operator = Operator::Lt;
    pub const LTE: Operator = Operator::Lte;
    pub const NULL_SAFE_EQ: Operator = Operator::NullSafeEq;
    pub const LIKE: Operator = Operator::Like;
    pub const NOT_LIKE: Operator = Operator::NotLike;
    pub const IN: Operator = Operator::In;
    pub const NOT_IN: Operator = Operator::NotIn;
    pub const IS_NULL: Operator = Operator::IsNull;
    pub const IS_NOT_NULL: Operator = Operator::IsNotNull;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_strings() {
        assert_eq!(Operator::Gt.as_str(), ">");
        assert_eq!(Operator::NotEq.as_str(), "!=");
        assert_eq!(Operator::NotLike.as_str(), "NOT LIKE");
        assert_eq!(format!("{}", Operator::IsNotNull), "IS NOT NULL");
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(">".into_operator().unwrap(), Operator::Gt);
        assert_eq!("like".into_operator().unwrap(), Operator::Like);
        assert_eq!("<>".into_operator().unwrap(), Operator::NotEq);
        assert_eq!("not   in".into_operator().unwrap(), Operator::NotIn);
        assert_eq!("is null".into_operator().unwrap(), Operator::IsNull);
        assert_eq!(op::GTE.into_operator().unwrap(), Operator::Gte);
    }

    #[test]
    fn test_invalid_string_conversion() {
        let err = "INVALID".into_operator().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(err.to_string().contains("unknown operator 'INVALID'"));
    }

    #[test]
    fn test_comparison_classification() {
        assert!(Operator::Eq.is_comparison());
        assert!(Operator::NullSafeEq.is_comparison());
        assert!(!Operator::In.is_comparison());
        assert!(!Operator::Like.is_comparison());
        assert_eq!(Operator::default(), Operator::Eq);
    }
}
