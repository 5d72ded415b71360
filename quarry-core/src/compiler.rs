//! Compiles condition trees into parameterised WHERE clauses

use crate::binder::{literal, quote_identifier, Escape};
use crate::condition::{Condition, Operand, Predicate};
use crate::{Error, Operator, Params, Result, Value};

/// A compiled boolean expression and the values bound to its placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledConditions {
    pub clause: String,
    pub params: Params,
}

impl CompiledConditions {
    /// The clause to put after `WHERE`; an empty tree matches every row
    pub fn where_clause(&self) -> &str {
        if self.clause.is_empty() {
            "1 = 1"
        } else {
            &self.clause
        }
    }
}

/// Compile `conditions` depth-first, left to right.
///
/// Groups are parenthesised and joined by their own connector; the connector
/// of the first node at each level is dropped. Empty groups compile to nothing.
pub fn compile<E: Escape + ?Sized>(escaper: &E, conditions: &[Condition]) -> Result<CompiledConditions> {
    let mut compiled = CompiledConditions::default();

    for condition in conditions {
        let (fragment, params) = match condition {
            Condition::Leaf(predicate) => compile_predicate(escaper, predicate)?,
            Condition::Group(group) => {
                let inner = compile(escaper, &group.conditions)?;
                if inner.clause.is_empty() {
                    continue;
                }
                (format!("({})", inner.clause), inner.params)
            }
        };

        if !compiled.clause.is_empty() {
            compiled.clause.push(' ');
            compiled.clause.push_str(condition.connector().as_str());
            compiled.clause.push(' ');
        }
        compiled.clause.push_str(&fragment);
        compiled.params.extend(params);
    }

    Ok(compiled)
}

fn compile_predicate<E: Escape + ?Sized>(escaper: &E, predicate: &Predicate) -> Result<(String, Params)> {
    let field = quote_identifier(escaper, &predicate.field);
    let mut params = Params::new();

    // column compared to column
    if let Operand::Field(other) = &predicate.operand {
        let sql = format!("{} {} {}", field, predicate.operator, quote_identifier(escaper, other));
        return Ok((sql, params));
    }

    let sql = match predicate.operator {
        Operator::Like | Operator::NotLike => {
            let needle = match &predicate.operand {
                Operand::Scalar(value) => value.to_string(),
                other => {
                    return Err(Error::invalid_argument(format!(
                        "{} on '{}' needs a single value, got {:?}",
                        predicate.operator, predicate.field, other
                    )))
                }
            };
            params.push(format!("%{}%", escape_like(&needle)));
            format!("{} {} ?", field, predicate.operator)
        }
        Operator::In | Operator::NotIn => {
            let values = match &predicate.operand {
                Operand::List(values) => values.as_slice(),
                Operand::Scalar(value) => std::slice::from_ref(value),
                other => {
                    return Err(Error::invalid_argument(format!(
                        "{} on '{}' needs a list of values, got {:?}",
                        predicate.operator, predicate.field, other
                    )))
                }
            };
            if values.is_empty() {
                // membership in an empty set: IN never matches, NOT IN always does
                params.push(1);
                params.push(if predicate.operator == Operator::In { 0 } else { 1 });
                "? = ?".to_string()
            } else {
                for value in values {
                    params.push(value.clone());
                }
                format!(
                    "{} {} ({})",
                    field,
                    predicate.operator,
                    vec!["?"; values.len()].join(", ")
                )
            }
        }
        Operator::IsNull | Operator::IsNotNull => format!("{} {}", field, predicate.operator),
        operator => {
            let value = match &predicate.operand {
                Operand::Scalar(value) => value.clone(),
                Operand::None => Value::Null,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "{} on '{}' needs a single value, got {:?}",
                        operator, predicate.field, other
                    )))
                }
            };
            params.push(value);
            format!("{} {} ?", field, operator)
        }
    };

    Ok((sql, params))
}

/// Escape LIKE wildcards so the needle matches literally
pub fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Count `?` placeholders outside quoted identifiers and string literals
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_placeholders(sql, |_| count += 1);
    count
}

/// Substitute every placeholder in `sql` with the escaped literal of its value.
///
/// Used for statements MySQL refuses to prepare with parameters, such as
/// `CREATE VIEW`.
pub fn inline_params<E: Escape + ?Sized>(escaper: &E, sql: &str, params: &Params) -> Result<String> {
    let expected = count_placeholders(sql);
    if expected != params.len() {
        return Err(Error::invalid_argument(format!(
            "statement has {} placeholders but {} values were supplied",
            expected,
            params.len()
        )));
    }

    let mut values = params.values().iter();
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match (quote, ch) {
            (None, '`' | '\'' | '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(q), c) if c == q => {
                quote = None;
                out.push(ch);
            }
            (None, '?') => match values.next() {
                Some(value) => out.push_str(&literal(escaper, value)),
                None => out.push(ch),
            },
            _ => out.push(ch),
        }
    }
    Ok(out)
}

fn scan_placeholders(sql: &str, mut on_placeholder: impl FnMut(usize)) {
    let mut quote: Option<char> = None;
    for (idx, ch) in sql.char_indices() {
        match (quote, ch) {
            (None, '`' | '\'' | '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => on_placeholder(idx),
            _ => {}
        }
    }
}
