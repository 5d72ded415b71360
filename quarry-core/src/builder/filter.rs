//! WHERE-clause building shared by queries and nested groups

use crate::condition::{Condition, ConditionGroup, Connector, IntoCondition, IntoOperand, Operand, Predicate};
use crate::{Error, Operator, Result};

/// Chainable WHERE methods.
///
/// Chained calls cannot fail, so a malformed condition is stored and reported
/// by the terminal method instead. Only the first such error is kept.
pub trait Filter: Sized {
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn defer_error(&mut self, error: Error);

    /// Append a predicate built elsewhere, or record why it could not be built
    fn push_predicate(mut self, predicate: Result<Predicate>, connector: Connector) -> Self {
        match predicate {
            Ok(mut predicate) => {
                predicate.connector = connector;
                self.conditions_mut().push(Condition::Leaf(predicate));
            }
            Err(e) => self.defer_error(e),
        }
        self
    }

    /// `where_(("age", 18))` or `where_(("age", op::GT, 18))`
    fn where_<C: IntoCondition>(self, condition: C) -> Self {
        self.push_predicate(condition.into_condition(), Connector::And)
    }

    fn or_where<C: IntoCondition>(self, condition: C) -> Self {
        self.push_predicate(condition.into_condition(), Connector::Or)
    }

    /// `field IN (...)`; an empty list matches no rows
    fn where_in<V: IntoOperand>(self, field: &str, values: V) -> Self {
        self.push_predicate(
            Predicate::new(field, Operator::In, values.into_operand()),
            Connector::And,
        )
    }

    /// `field NOT IN (...)`; an empty list matches every row
    fn where_not_in<V: IntoOperand>(self, field: &str, values: V) -> Self {
        self.push_predicate(
            Predicate::new(field, Operator::NotIn, values.into_operand()),
            Connector::And,
        )
    }

    fn where_null(self, field: &str) -> Self {
        self.push_predicate(Predicate::new(field, Operator::IsNull, Operand::None), Connector::And)
    }

    fn where_not_null(self, field: &str) -> Self {
        self.push_predicate(Predicate::new(field, Operator::IsNotNull, Operand::None), Connector::And)
    }

    /// Substring match; `%` and `_` in `needle` match literally
    fn where_like(self, field: &str, needle: &str) -> Self {
        self.push_predicate(
            Predicate::new(field, Operator::Like, needle.into_operand()),
            Connector::And,
        )
    }

    fn where_not_like(self, field: &str, needle: &str) -> Self {
        self.push_predicate(
            Predicate::new(field, Operator::NotLike, needle.into_operand()),
            Connector::And,
        )
    }

    /// Compare two columns without binding, as in join conditions
    fn where_fields_equal(self, field: &str, other: &str) -> Self {
        self.push_predicate(
            Predicate::new(field, Operator::Eq, Operand::Field(other.to_string())),
            Connector::And,
        )
    }

    /// A parenthesised sub-expression joined with AND
    fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(Group) -> Group,
    {
        self.push_group(build(Group::new()), Connector::And)
    }

    /// A parenthesised sub-expression joined with OR
    fn or_where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(Group) -> Group,
    {
        self.push_group(build(Group::new()), Connector::Or)
    }

    fn push_group(mut self, group: Group, connector: Connector) -> Self {
        match group.error {
            Some(e) => self.defer_error(e),
            None => self.conditions_mut().push(Condition::Group(ConditionGroup {
                conditions: group.conditions,
                connector,
            })),
        }
        self
    }
}

/// Conditions collected inside a `where_group` callback
#[derive(Debug, Default)]
pub struct Group {
    conditions: Vec<Condition>,
    error: Option<Error>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected tree, or the first malformed condition
    pub fn build(self) -> Result<Vec<Condition>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.conditions),
        }
    }
}

impl Filter for Group {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn defer_error(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }
}
