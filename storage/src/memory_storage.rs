//! In-memory backend. Rows live in insertion order per table; transactions
//! snapshot the whole table set at the outermost `begin` and restore it on
//! rollback, so a failed operation leaves no partial writes behind.

use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;

use crate::{Assign, Direction, Query, RecordStorage, Row, StorageError, Value};

#[derive(Debug, Default, Clone)]
struct Table {
    next_id: i64,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: IndexMap<String, Table>,
    snapshot: Option<IndexMap<String, Table>>,
    depth: usize,
}

/// Single-process record store; the mutex makes every statement atomic, so
/// requested row locks are trivially satisfied.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables are not created implicitly; there is no schema migration in
    /// the engine, so fixtures declare their tables up front.
    pub fn create_table(&self, name: impl Into<String>) {
        self.lock().tables.entry(name.into()).or_default();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("storage lock poisoned")
    }

    fn sort_rows(rows: &mut [Row], order_by: &[(String, Direction)]) {
        rows.sort_by(|a, b| {
            for (column, direction) in order_by {
                let left = a.get(column).unwrap_or(&Value::Null);
                let right = b.get(column).unwrap_or(&Value::Null);
                let ordering = left.compare(right).unwrap_or(Ordering::Equal);
                let ordering = match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}

fn table<'a>(inner: &'a mut Inner, name: &str) -> Result<&'a mut Table, StorageError> {
    inner
        .tables
        .get_mut(name)
        .ok_or_else(|| StorageError::UnknownTable(name.to_owned()))
}

impl RecordStorage for MemoryStorage {
    fn select(&self, table_name: &str, query: &Query) -> Result<Vec<Row>, StorageError> {
        let mut inner = self.lock();
        let table = table(&mut inner, table_name)?;
        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| query.predicate.matches(row))
            .cloned()
            .collect();
        Self::sort_rows(&mut rows, &query.order_by);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn insert(
        &self,
        table_name: &str,
        primary_key: &str,
        mut row: Row,
    ) -> Result<Value, StorageError> {
        let mut inner = self.lock();
        let table = table(&mut inner, table_name)?;
        let key = match row.get(primary_key) {
            None | Some(Value::Null) => {
                table.next_id += 1;
                let key = Value::Integer(table.next_id);
                row.insert(primary_key.to_owned(), key.clone());
                key
            }
            Some(given) => {
                if let Value::Integer(n) = given {
                    table.next_id = table.next_id.max(*n);
                }
                given.clone()
            }
        };
        table.rows.push(row);
        Ok(key)
    }

    fn update(
        &self,
        table_name: &str,
        query: &Query,
        assigns: &[Assign],
    ) -> Result<u64, StorageError> {
        let mut inner = self.lock();
        let table = table(&mut inner, table_name)?;
        let mut touched = 0;
        for row in table.rows.iter_mut() {
            if query.predicate.matches(row) {
                for assign in assigns {
                    assign.apply(row)?;
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn delete(&self, table_name: &str, query: &Query) -> Result<u64, StorageError> {
        let mut inner = self.lock();
        let table = table(&mut inner, table_name)?;
        let before = table.rows.len();
        table.rows.retain(|row| !query.predicate.matches(row));
        Ok((before - table.rows.len()) as u64)
    }

    fn begin(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.depth == 0 {
            inner.snapshot = Some(inner.tables.clone());
        }
        inner.depth += 1;
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.depth == 0 {
            return Err(StorageError::NoActiveTransaction);
        }
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.snapshot = None;
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.depth == 0 {
            return Err(StorageError::NoActiveTransaction);
        }
        let snapshot = inner
            .snapshot
            .take()
            .ok_or(StorageError::NoActiveTransaction)?;
        inner.tables = snapshot;
        inner.depth = 0;
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.lock().depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Predicate;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_assigns_integer_keys() {
        let storage = MemoryStorage::new();
        storage.create_table("items");
        let first = storage
            .insert("items", "id", row(&[("name", "a".into())]))
            .expect("insert");
        let second = storage
            .insert("items", "id", row(&[("name", "b".into())]))
            .expect("insert");
        assert_eq!(first, Value::Integer(1));
        assert_eq!(second, Value::Integer(2));

        // An explicit key advances the generator past itself
        storage
            .insert(
                "items",
                "id",
                row(&[("id", Value::Integer(10)), ("name", "c".into())]),
            )
            .expect("insert");
        let fourth = storage
            .insert("items", "id", row(&[("name", "d".into())]))
            .expect("insert");
        assert_eq!(fourth, Value::Integer(11));
    }

    #[test]
    fn test_unknown_table_is_an_error() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.select("missing", &Query::all()),
            Err(StorageError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_select_orders_and_limits() {
        let storage = MemoryStorage::new();
        storage.create_table("items");
        for n in [3i64, 1, 2] {
            storage
                .insert("items", "id", row(&[("rank", Value::Integer(n))]))
                .expect("insert");
        }
        let rows = storage
            .select(
                "items",
                &Query::all().order_by("rank", Direction::Asc).limit(2),
            )
            .expect("select");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["rank"], Value::Integer(1));
        assert_eq!(rows[1]["rank"], Value::Integer(2));
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let storage = MemoryStorage::new();
        storage.create_table("items");
        storage
            .insert("items", "id", row(&[("name", "kept".into())]))
            .expect("insert");

        storage.begin().expect("begin");
        storage
            .insert("items", "id", row(&[("name", "discarded".into())]))
            .expect("insert");
        storage
            .delete(
                "items",
                &Query::filter(Predicate::Eq("name".into(), "kept".into())),
            )
            .expect("delete");
        storage.rollback().expect("rollback");

        let rows = storage.select("items", &Query::all()).expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Value::Text("kept".into()));
        assert_eq!(storage.transaction_level(), 0);
    }

    #[test]
    fn test_nested_transactions_flatten() {
        let storage = MemoryStorage::new();
        storage.create_table("items");

        storage.begin().expect("begin");
        storage.begin().expect("inner begin");
        assert_eq!(storage.transaction_level(), 2);
        storage
            .insert("items", "id", row(&[("name", "x".into())]))
            .expect("insert");
        storage.commit().expect("inner commit");
        // Inner commit publishes nothing yet; rollback still undoes the lot.
        storage.rollback().expect("rollback");

        let rows = storage.select("items", &Query::all()).expect("select");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_commit_without_begin_fails() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.commit(),
            Err(StorageError::NoActiveTransaction)
        ));
    }
}
