//! Record store abstraction the tree engine is written against.
//! A store holds tables of attribute rows and offers transactional CRUD with
//! composable predicates; the concrete backend is swappable, so the engine
//! works the same over the bundled in-memory store or a SQL connection.

#[cfg(feature = "memory_storage")]
pub mod memory_storage;
pub mod sql;

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("no transaction is active")]
    NoActiveTransaction,
    #[error("type error: {0}")]
    TypeError(String),
}

/// Dynamically typed column value. Primary keys are values too, so integer
/// and text keys are supported alike. Structural equality (`==`) treats two
/// nulls as equal and is what map keys use; `compare` carries the SQL
/// three-valued semantics instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// SQL-flavoured comparison: any comparison involving `NULL` or two
    /// values of different types does not hold.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One stored row; column order is kept stable for reproducible scans.
pub type Row = IndexMap<String, Value>;

fn row_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

/// Composable filter tree evaluated by backends (or rendered to SQL by the
/// `sql` module).
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Between(String, Value, Value),
    IsNull(String),
    IsNotNull(String),
    /// `minuend - subtrahend = difference`, both columns integer.
    DiffEq(String, String, i64),
    /// `minuend - subtrahend <> difference`.
    DiffNe(String, String, i64),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq(column, value) => {
                row_value(row, column).compare(value) == Some(Ordering::Equal)
            }
            Predicate::Ne(column, value) => matches!(
                row_value(row, column).compare(value),
                Some(Ordering::Less) | Some(Ordering::Greater)
            ),
            Predicate::Lt(column, value) => {
                row_value(row, column).compare(value) == Some(Ordering::Less)
            }
            Predicate::Le(column, value) => matches!(
                row_value(row, column).compare(value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Predicate::Gt(column, value) => {
                row_value(row, column).compare(value) == Some(Ordering::Greater)
            }
            Predicate::Ge(column, value) => matches!(
                row_value(row, column).compare(value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Predicate::Between(column, low, high) => {
                let value = row_value(row, column);
                matches!(
                    value.compare(low),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ) && matches!(
                    value.compare(high),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                )
            }
            Predicate::IsNull(column) => row_value(row, column).is_null(),
            Predicate::IsNotNull(column) => !row_value(row, column).is_null(),
            Predicate::DiffEq(minuend, subtrahend, difference) => {
                match (
                    row_value(row, minuend).as_integer(),
                    row_value(row, subtrahend).as_integer(),
                ) {
                    (Some(a), Some(b)) => a - b == *difference,
                    _ => false,
                }
            }
            Predicate::DiffNe(minuend, subtrahend, difference) => {
                match (
                    row_value(row, minuend).as_integer(),
                    row_value(row, subtrahend).as_integer(),
                ) {
                    (Some(a), Some(b)) => a - b != *difference,
                    _ => false,
                }
            }
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(row)),
            Predicate::Not(inner) => !inner.matches(row),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Row lock requested alongside a select, honored by backends that support
/// row-level locking and rendered as `FOR SHARE`/`FOR UPDATE` in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub predicate: Predicate,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub lock: LockMode,
}

impl Query {
    pub fn filter(predicate: Predicate) -> Self {
        Query {
            predicate,
            order_by: Vec::new(),
            limit: None,
            lock: LockMode::None,
        }
    }

    pub fn all() -> Self {
        Query::filter(Predicate::And(Vec::new()))
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }
}

/// Update assignments. `ShiftSpans` and `SetWhere` carry the conditional
/// rewrites the move engine issues as a single statement.
#[derive(Debug, Clone)]
pub enum Assign {
    Set(String, Value),
    Increment(String, i64),
    /// `CASE WHEN column BETWEEN lower THEN column + lower_delta
    ///       WHEN column BETWEEN upper THEN column + upper_delta
    ///       ELSE column END`
    ShiftSpans {
        column: String,
        lower: (i64, i64),
        lower_delta: i64,
        upper: (i64, i64),
        upper_delta: i64,
    },
    /// `CASE WHEN key_column = key THEN value ELSE column END`
    SetWhere {
        column: String,
        key_column: String,
        key: Value,
        value: Value,
    },
}

impl Assign {
    /// Apply the assignment to a single row in place.
    pub fn apply(&self, row: &mut Row) -> Result<(), StorageError> {
        match self {
            Assign::Set(column, value) => {
                row.insert(column.clone(), value.clone());
                Ok(())
            }
            Assign::Increment(column, delta) => match row_value(row, column) {
                Value::Null => Ok(()),
                Value::Integer(n) => {
                    let shifted = Value::Integer(n + delta);
                    row.insert(column.clone(), shifted);
                    Ok(())
                }
                other => Err(StorageError::TypeError(format!(
                    "cannot increment non-integer column {column}: {other:?}"
                ))),
            },
            Assign::ShiftSpans {
                column,
                lower,
                lower_delta,
                upper,
                upper_delta,
            } => match row_value(row, column) {
                Value::Integer(n) => {
                    let n = *n;
                    let shifted = if n >= lower.0 && n <= lower.1 {
                        n + lower_delta
                    } else if n >= upper.0 && n <= upper.1 {
                        n + upper_delta
                    } else {
                        n
                    };
                    row.insert(column.clone(), Value::Integer(shifted));
                    Ok(())
                }
                Value::Null => Ok(()),
                other => Err(StorageError::TypeError(format!(
                    "cannot shift non-integer column {column}: {other:?}"
                ))),
            },
            Assign::SetWhere {
                column,
                key_column,
                key,
                value,
            } => {
                if row_value(row, key_column).compare(key) == Some(Ordering::Equal) {
                    row.insert(column.clone(), value.clone());
                }
                Ok(())
            }
        }
    }
}

/// Transactional CRUD contract consumed by the tree engine.
///
/// `begin`/`commit`/`rollback` flatten nesting: frames are counted and only
/// the outermost one snapshots or publishes, so engine code may open a
/// transaction without caring whether a caller already holds one.
pub trait RecordStorage {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StorageError>;

    /// Insert a row. When the primary key column is absent or null the
    /// backend assigns one; the effective key is returned either way.
    fn insert(&self, table: &str, primary_key: &str, row: Row) -> Result<Value, StorageError>;

    fn update(&self, table: &str, query: &Query, assigns: &[Assign])
        -> Result<u64, StorageError>;

    fn delete(&self, table: &str, query: &Query) -> Result<u64, StorageError>;

    fn begin(&self) -> Result<(), StorageError>;
    fn commit(&self) -> Result<(), StorageError>;
    fn rollback(&self) -> Result<(), StorageError>;
    fn transaction_level(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_null_comparisons_never_hold() {
        let r = row(&[("lft", Value::Null)]);
        assert!(!Predicate::Eq("lft".into(), Value::Integer(1)).matches(&r));
        assert!(!Predicate::Ne("lft".into(), Value::Integer(1)).matches(&r));
        assert!(!Predicate::Lt("lft".into(), Value::Integer(1)).matches(&r));
        assert!(Predicate::IsNull("lft".into()).matches(&r));
    }

    #[test]
    fn test_between_and_diff_predicates() {
        let r = row(&[("lft", Value::Integer(2)), ("rgt", Value::Integer(3))]);
        assert!(Predicate::Between("lft".into(), 1.into(), 2.into()).matches(&r));
        assert!(!Predicate::Between("lft".into(), 3.into(), 9.into()).matches(&r));
        assert!(Predicate::DiffEq("rgt".into(), "lft".into(), 1).matches(&r));
        assert!(!Predicate::DiffNe("rgt".into(), "lft".into(), 1).matches(&r));
    }

    #[test]
    fn test_shift_spans_assignment() {
        let assign = Assign::ShiftSpans {
            column: "lft".into(),
            lower: (2, 5),
            lower_delta: 3,
            upper: (6, 8),
            upper_delta: -4,
        };
        let mut inside_lower = row(&[("lft", Value::Integer(2))]);
        assign.apply(&mut inside_lower).unwrap();
        assert_eq!(inside_lower["lft"], Value::Integer(5));

        let mut inside_upper = row(&[("lft", Value::Integer(7))]);
        assign.apply(&mut inside_upper).unwrap();
        assert_eq!(inside_upper["lft"], Value::Integer(3));

        let mut outside = row(&[("lft", Value::Integer(1))]);
        assign.apply(&mut outside).unwrap();
        assert_eq!(outside["lft"], Value::Integer(1));
    }

    #[test]
    fn test_set_where_assignment() {
        let assign = Assign::SetWhere {
            column: "parent_id".into(),
            key_column: "id".into(),
            key: Value::Integer(7),
            value: Value::Integer(1),
        };
        let mut hit = row(&[("id", Value::Integer(7)), ("parent_id", Value::Null)]);
        assign.apply(&mut hit).unwrap();
        assert_eq!(hit["parent_id"], Value::Integer(1));

        let mut miss = row(&[("id", Value::Integer(8)), ("parent_id", Value::Null)]);
        assign.apply(&mut miss).unwrap();
        assert_eq!(miss["parent_id"], Value::Null);
    }
}
