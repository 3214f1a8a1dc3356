//! SQL text rendering for queries and updates. The engine itself evaluates
//! predicates through the backend, but SQL-backed stores (and the tracing
//! output of the move engine) need the textual form, `CASE WHEN` rewrites
//! included.

use crate::{Assign, Direction, LockMode, Predicate, Query, Value};

/// Identifier-quoting rules of one SQL dialect.
#[derive(Debug, Clone)]
pub struct Grammar {
    quote: char,
    shared_lock_suffix: &'static str,
    exclusive_lock_suffix: &'static str,
}

impl Grammar {
    pub fn ansi() -> Self {
        Grammar {
            quote: '"',
            shared_lock_suffix: "FOR SHARE",
            exclusive_lock_suffix: "FOR UPDATE",
        }
    }

    pub fn mysql() -> Self {
        Grammar {
            quote: '`',
            shared_lock_suffix: "LOCK IN SHARE MODE",
            exclusive_lock_suffix: "FOR UPDATE",
        }
    }

    /// Quote a possibly table-qualified identifier; embedded quote
    /// characters are doubled.
    pub fn wrap(&self, identifier: &str) -> String {
        identifier
            .split('.')
            .map(|segment| {
                let escaped = segment.replace(self.quote, &self.quote.to_string().repeat(2));
                format!("{0}{1}{0}", self.quote, escaped)
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn lock_suffix(&self, lock: LockMode) -> Option<&'static str> {
        match lock {
            LockMode::None => None,
            LockMode::Shared => Some(self.shared_lock_suffix),
            LockMode::Exclusive => Some(self.exclusive_lock_suffix),
        }
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::ansi()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Integer(n) => n.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bool(true) => "TRUE".to_owned(),
        Value::Bool(false) => "FALSE".to_owned(),
    }
}

fn render_predicate(grammar: &Grammar, predicate: &Predicate) -> String {
    match predicate {
        Predicate::Eq(column, value) => {
            format!("{} = {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Ne(column, value) => {
            format!("{} <> {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Lt(column, value) => {
            format!("{} < {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Le(column, value) => {
            format!("{} <= {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Gt(column, value) => {
            format!("{} > {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Ge(column, value) => {
            format!("{} >= {}", grammar.wrap(column), render_value(value))
        }
        Predicate::Between(column, low, high) => format!(
            "{} BETWEEN {} AND {}",
            grammar.wrap(column),
            render_value(low),
            render_value(high)
        ),
        Predicate::IsNull(column) => format!("{} IS NULL", grammar.wrap(column)),
        Predicate::IsNotNull(column) => format!("{} IS NOT NULL", grammar.wrap(column)),
        Predicate::DiffEq(minuend, subtrahend, difference) => format!(
            "{} - {} = {}",
            grammar.wrap(minuend),
            grammar.wrap(subtrahend),
            difference
        ),
        Predicate::DiffNe(minuend, subtrahend, difference) => format!(
            "{} - {} <> {}",
            grammar.wrap(minuend),
            grammar.wrap(subtrahend),
            difference
        ),
        Predicate::And(parts) if parts.is_empty() => "1 = 1".to_owned(),
        Predicate::And(parts) => parts
            .iter()
            .map(|p| format!("({})", render_predicate(grammar, p)))
            .collect::<Vec<_>>()
            .join(" AND "),
        Predicate::Or(parts) if parts.is_empty() => "1 = 0".to_owned(),
        Predicate::Or(parts) => parts
            .iter()
            .map(|p| format!("({})", render_predicate(grammar, p)))
            .collect::<Vec<_>>()
            .join(" OR "),
        Predicate::Not(inner) => format!("NOT ({})", render_predicate(grammar, inner)),
    }
}

fn render_suffix(grammar: &Grammar, query: &Query) -> String {
    let mut sql = String::new();
    if !matches!(&query.predicate, Predicate::And(parts) if parts.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(&render_predicate(grammar, &query.predicate));
    }
    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|(column, direction)| {
                let keyword = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {}", grammar.wrap(column), keyword)
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

pub fn render_select(grammar: &Grammar, table: &str, query: &Query) -> String {
    let mut sql = format!("SELECT * FROM {}", grammar.wrap(table));
    sql.push_str(&render_suffix(grammar, query));
    if let Some(suffix) = grammar.lock_suffix(query.lock) {
        sql.push(' ');
        sql.push_str(suffix);
    }
    sql
}

pub fn render_delete(grammar: &Grammar, table: &str, query: &Query) -> String {
    let mut sql = format!("DELETE FROM {}", grammar.wrap(table));
    sql.push_str(&render_suffix(grammar, query));
    sql
}

fn render_assign(grammar: &Grammar, assign: &Assign) -> String {
    match assign {
        Assign::Set(column, value) => {
            format!("{} = {}", grammar.wrap(column), render_value(value))
        }
        Assign::Increment(column, delta) => {
            let wrapped = grammar.wrap(column);
            if *delta < 0 {
                format!("{wrapped} = {wrapped} - {}", -delta)
            } else {
                format!("{wrapped} = {wrapped} + {delta}")
            }
        }
        Assign::ShiftSpans {
            column,
            lower,
            lower_delta,
            upper,
            upper_delta,
        } => {
            let wrapped = grammar.wrap(column);
            format!(
                "{wrapped} = CASE WHEN {wrapped} BETWEEN {} AND {} THEN {wrapped} + {} \
                 WHEN {wrapped} BETWEEN {} AND {} THEN {wrapped} + {} ELSE {wrapped} END",
                lower.0, lower.1, lower_delta, upper.0, upper.1, upper_delta
            )
        }
        Assign::SetWhere {
            column,
            key_column,
            key,
            value,
        } => {
            let wrapped = grammar.wrap(column);
            format!(
                "{wrapped} = CASE WHEN {} = {} THEN {} ELSE {wrapped} END",
                grammar.wrap(key_column),
                render_value(key),
                render_value(value)
            )
        }
    }
}

pub fn render_update(grammar: &Grammar, table: &str, query: &Query, assigns: &[Assign]) -> String {
    let sets = assigns
        .iter()
        .map(|assign| render_assign(grammar, assign))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("UPDATE {} SET {}", grammar.wrap(table), sets);
    if !matches!(&query.predicate, Predicate::And(parts) if parts.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(&render_predicate(grammar, &query.predicate));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_qualified_identifiers() {
        let grammar = Grammar::ansi();
        assert_eq!(grammar.wrap("lft"), "\"lft\"");
        assert_eq!(grammar.wrap("categories.lft"), "\"categories\".\"lft\"");
        assert_eq!(grammar.wrap("we\"ird"), "\"we\"\"ird\"");

        let mysql = Grammar::mysql();
        assert_eq!(mysql.wrap("categories.lft"), "`categories`.`lft`");
    }

    #[test]
    fn test_render_select_with_lock() {
        let grammar = Grammar::ansi();
        let query = Query::filter(Predicate::Ge("rgt".into(), Value::Integer(5)))
            .order_by("lft", Direction::Asc)
            .lock(crate::LockMode::Exclusive);
        assert_eq!(
            render_select(&grammar, "categories", &query),
            "SELECT * FROM \"categories\" WHERE \"rgt\" >= 5 ORDER BY \"lft\" ASC FOR UPDATE"
        );

        let shared = Query::all().lock(crate::LockMode::Shared);
        assert_eq!(
            render_select(&Grammar::mysql(), "categories", &shared),
            "SELECT * FROM `categories` LOCK IN SHARE MODE"
        );
    }

    #[test]
    fn test_render_case_rewrite_update() {
        let grammar = Grammar::ansi();
        let query = Query::filter(Predicate::Between(
            "lft".into(),
            Value::Integer(2),
            Value::Integer(8),
        ));
        let assigns = vec![
            Assign::ShiftSpans {
                column: "lft".into(),
                lower: (2, 5),
                lower_delta: 3,
                upper: (6, 8),
                upper_delta: -4,
            },
            Assign::SetWhere {
                column: "parent_id".into(),
                key_column: "id".into(),
                key: Value::Integer(2),
                value: Value::Integer(4),
            },
        ];
        let sql = render_update(&grammar, "categories", &query, &assigns);
        assert_eq!(
            sql,
            "UPDATE \"categories\" SET \
             \"lft\" = CASE WHEN \"lft\" BETWEEN 2 AND 5 THEN \"lft\" + 3 \
             WHEN \"lft\" BETWEEN 6 AND 8 THEN \"lft\" + -4 ELSE \"lft\" END, \
             \"parent_id\" = CASE WHEN \"id\" = 2 THEN 4 ELSE \"parent_id\" END \
             WHERE \"lft\" BETWEEN 2 AND 8"
        );
    }

    #[test]
    fn test_render_increment_and_delete() {
        let grammar = Grammar::ansi();
        let query = Query::filter(Predicate::Gt("lft".into(), Value::Integer(5)));
        assert_eq!(
            render_update(&grammar, "t", &query, &[Assign::Increment("lft".into(), -4)]),
            "UPDATE \"t\" SET \"lft\" = \"lft\" - 4 WHERE \"lft\" > 5"
        );
        assert_eq!(
            render_delete(&grammar, "t", &query),
            "DELETE FROM \"t\" WHERE \"lft\" > 5"
        );
    }
}
