//! SELECT options: ordering, grouping, limits, joins and column selections

use crate::binder::{quote_identifier, Escape};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort direction for ORDER BY clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl SortDirection {
    /// Lenient parse, anything other than `desc` sorts ascending
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderBy {
    Column {
        field: String,
        direction: SortDirection,
    },
    /// `ORDER BY RAND()`
    Random,
}

/// JOIN types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
        }
    }
}

/// `<type> JOIN table ON table.compare_field = with_table.against_field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub compare_field: String,
    pub against_field: String,
    /// Table the joined one is matched against; the queried table when `None`
    pub with_table: Option<String>,
}

impl Join {
    /// Render the JOIN clause for a query on `base_table`
    pub fn to_sql<E: Escape + ?Sized>(&self, escaper: &E, base_table: &str) -> String {
        let left = qualify(&self.table, &self.compare_field);
        let right = qualify(self.with_table.as_deref().unwrap_or(base_table), &self.against_field);
        format!(
            "{} JOIN {} ON {} = {}",
            self.join_type,
            quote_identifier(escaper, &self.table),
            quote_identifier(escaper, &left),
            quote_identifier(escaper, &right)
        )
    }
}

fn qualify(table: &str, field: &str) -> String {
    if field.contains('.') {
        field.to_string()
    } else {
        format!("{}.{}", table, field)
    }
}

/// LIMIT offset, count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

/// Accumulated SELECT options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub order_by: Vec<OrderBy>,
    pub group_by: Option<String>,
    pub limit: Option<Limit>,
    pub joins: Vec<Join>,
}

impl QueryOptions {
    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Copy of these options without LIMIT or ORDER BY, for counting and
    /// aggregating over every matching row
    pub fn unbounded(&self) -> Self {
        Self {
            limit: None,
            order_by: Vec::new(),
            ..self.clone()
        }
    }

    /// Render the JOIN clauses, each prefixed by a space
    pub fn join_sql<E: Escape + ?Sized>(&self, escaper: &E, base_table: &str) -> String {
        self.joins
            .iter()
            .map(|join| format!(" {}", join.to_sql(escaper, base_table)))
            .collect()
    }

    /// Render GROUP BY, ORDER BY and LIMIT, each prefixed by a space
    pub fn tail_sql<E: Escape + ?Sized>(&self, escaper: &E) -> String {
        let mut sql = String::new();

        if let Some(group) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(&quote_identifier(escaper, group));
        }

        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|order| match order {
                    OrderBy::Column { field, direction } => {
                        format!("{} {}", quote_identifier(escaper, field), direction)
                    }
                    OrderBy::Random => "RAND()".to_string(),
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}, {}", limit.offset, limit.count));
        }

        sql
    }
}

/// Aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count => write!(f, "COUNT"),
            Aggregate::Sum => write!(f, "SUM"),
            Aggregate::Avg => write!(f, "AVG"),
            Aggregate::Min => write!(f, "MIN"),
            Aggregate::Max => write!(f, "MAX"),
        }
    }
}

/// A column in the SELECT list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A plain (optionally qualified) column, or `*`
    Column(String),
    /// `column AS alias`
    Aliased { column: String, alias: String },
    /// A computed expression, emitted verbatim: `expression AS alias`
    Computed { expression: String, alias: String },
    /// `FUNC(column) AS alias`, `column = None` meaning `*`
    Aggregate {
        function: Aggregate,
        column: Option<String>,
        alias: String,
    },
}

impl Selection {
    pub fn to_sql<E: Escape + ?Sized>(&self, escaper: &E) -> String {
        match self {
            Selection::Column(column) => quote_identifier(escaper, column),
            Selection::Aliased { column, alias } => format!(
                "{} AS {}",
                quote_identifier(escaper, column),
                quote_identifier(escaper, alias)
            ),
            Selection::Computed { expression, alias } => {
                format!("{} AS {}", expression, quote_identifier(escaper, alias))
            }
            Selection::Aggregate {
                function,
                column,
                alias,
            } => {
                let target = match column {
                    Some(column) => quote_identifier(escaper, column),
                    None => "*".to_string(),
                };
                format!("{}({}) AS {}", function, target, quote_identifier(escaper, alias))
            }
        }
    }
}

impl From<&str> for Selection {
    fn from(column: &str) -> Self {
        Selection::Column(column.to_string())
    }
}

impl From<String> for Selection {
    fn from(column: String) -> Self {
        Selection::Column(column)
    }
}

/// Render a SELECT list, defaulting to `*`
pub fn selection_sql<E: Escape + ?Sized>(escaper: &E, fields: &[Selection]) -> String {
    if fields.is_empty() {
        return "*".to_string();
    }
    fields
        .iter()
        .map(|f| f.to_sql(escaper))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trait to convert various types into selections
pub trait IntoSelections {
    fn into_selections(self) -> Vec<Selection>;
}

impl IntoSelections for &str {
    fn into_selections(self) -> Vec<Selection> {
        vec![Selection::from(self)]
    }
}

impl IntoSelections for Selection {
    fn into_selections(self) -> Vec<Selection> {
        vec![self]
    }
}

impl<T> IntoSelections for Vec<T>
where
    T: Into<Selection>,
{
    fn into_selections(self) -> Vec<Selection> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T, const N: usize> IntoSelections for [T; N]
where
    T: Into<Selection>,
{
    fn into_selections(self) -> Vec<Selection> {
        self.into_iter().map(Into::into).collect()
    }
}
