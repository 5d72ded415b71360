//! Boolean condition trees used in WHERE clauses

use crate::{Error, IntoOperator, Operator, Result, Value};
use serde::{Deserialize, Serialize};

/// How a condition is joined to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// Right-hand side of a condition leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// No value (`IS NULL`, `IS NOT NULL`)
    None,
    /// A single bound value
    Scalar(Value),
    /// A list of bound values (`IN`, `NOT IN`)
    List(Vec<Value>),
    /// Another column, compared without binding
    Field(String),
}

/// A single `field <op> operand` comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
    pub connector: Connector,
}

impl Predicate {
    /// Build a predicate, checking the operand shape against the operator
    pub fn new(field: impl Into<String>, operator: Operator, operand: Operand) -> Result<Self> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(Error::invalid_argument("condition field name is required"));
        }

        let operand = match (operator, operand) {
            (Operator::IsNull | Operator::IsNotNull, _) => Operand::None,
            (Operator::In | Operator::NotIn, Operand::Scalar(v)) => Operand::List(vec![v]),
            (Operator::In | Operator::NotIn, list @ Operand::List(_)) => list,
            (Operator::In | Operator::NotIn, other) => {
                return Err(Error::invalid_argument(format!(
                    "{} on '{}' needs a list of values, got {:?}",
                    operator, field, other
                )))
            }
            (_, Operand::List(_)) => {
                return Err(Error::invalid_argument(format!(
                    "{} on '{}' cannot take a list of values",
                    operator, field
                )))
            }
            (_, Operand::None) => Operand::Scalar(Value::Null),
            (_, operand) => operand,
        };

        if let Operand::Field(other) = &operand {
            if other.trim().is_empty() {
                return Err(Error::invalid_argument("compared field name is required"));
            }
            if !operator.is_comparison() {
                return Err(Error::invalid_argument(format!(
                    "fields can only be compared with a comparison operator, got {}",
                    operator
                )));
            }
        }

        Ok(Self {
            field,
            operator,
            operand,
            connector: Connector::And,
        })
    }

    /// Number of values this leaf binds once compiled
    pub fn bound_value_count(&self) -> usize {
        match (&self.operator, &self.operand) {
            (_, Operand::Field(_)) | (_, Operand::None) => 0,
            // empty lists compile to a two-placeholder constant predicate
            (_, Operand::List(values)) if values.is_empty() => 2,
            (_, Operand::List(values)) => values.len(),
            (_, Operand::Scalar(_)) => 1,
        }
    }
}

/// A parenthesised group of conditions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub conditions: Vec<Condition>,
    pub connector: Connector,
}

/// A node in a WHERE tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Leaf(Predicate),
    Group(ConditionGroup),
}

impl Condition {
    pub fn connector(&self) -> Connector {
        match self {
            Condition::Leaf(p) => p.connector,
            Condition::Group(g) => g.connector,
        }
    }

    pub fn with_connector(mut self, connector: Connector) -> Self {
        match &mut self {
            Condition::Leaf(p) => p.connector = connector,
            Condition::Group(g) => g.connector = connector,
        }
        self
    }

    /// Total bound values under this node
    pub fn bound_value_count(&self) -> usize {
        match self {
            Condition::Leaf(p) => p.bound_value_count(),
            Condition::Group(g) => g.conditions.iter().map(Condition::bound_value_count).sum(),
        }
    }
}

/// Trait for types that can be used as the right-hand side of a condition
pub trait IntoOperand {
    fn into_operand(self) -> Operand;
}

impl IntoOperand for Operand {
    fn into_operand(self) -> Operand {
        self
    }
}

macro_rules! scalar_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOperand for $ty {
                fn into_operand(self) -> Operand {
                    Operand::Scalar(Value::from(self))
                }
            }
        )*
    };
}

scalar_operand!((), Value, bool, i32, u32, i64, f32, f64, String, &str, &String, serde_json::Value);

impl<T> IntoOperand for Option<T>
where
    T: Into<Value>,
{
    fn into_operand(self) -> Operand {
        Operand::Scalar(Value::from(self))
    }
}

impl<T> IntoOperand for Vec<T>
where
    T: Into<Value>,
{
    fn into_operand(self) -> Operand {
        Operand::List(self.into_iter().map(Into::into).collect())
    }
}

impl<T> IntoOperand for &[T]
where
    T: Clone + Into<Value>,
{
    fn into_operand(self) -> Operand {
        Operand::List(self.iter().cloned().map(Into::into).collect())
    }
}

impl<T, const N: usize> IntoOperand for [T; N]
where
    T: Into<Value>,
{
    fn into_operand(self) -> Operand {
        Operand::List(self.into_iter().map(Into::into).collect())
    }
}

/// Trait for conditions that can be used in WHERE clauses
pub trait IntoCondition {
    fn into_condition(self) -> Result<Predicate>;
}

impl IntoCondition for Predicate {
    fn into_condition(self) -> Result<Predicate> {
        Ok(self)
    }
}

// Shorthand equality: where_(("age", 18))
impl<T> IntoCondition for (&str, T)
where
    T: IntoOperand,
{
    fn into_condition(self) -> Result<Predicate> {
        Predicate::new(self.0, Operator::Eq, self.1.into_operand())
    }
}

// Explicit operators: where_(("age", op::GT, 18)) or where_(("age", ">", 18))
impl<T, O> IntoCondition for (&str, O, T)
where
    T: IntoOperand,
    O: IntoOperator,
{
    fn into_condition(self) -> Result<Predicate> {
        Predicate::new(self.0, self.1.into_operator()?, self.2.into_operand())
    }
}
