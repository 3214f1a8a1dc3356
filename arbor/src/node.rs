//! In-memory handle of one tree row. A node is a view of the stored row:
//! attribute bag, per-column dirty set and a persistence flag. Handles go
//! stale whenever the engine rewrites bounds and must be reloaded then.

use std::collections::BTreeSet;
use std::sync::Arc;

use storage::{Row, Value};

use crate::schema::TreeSchema;

#[derive(Debug, Clone)]
pub struct Node {
    schema: Arc<TreeSchema>,
    attributes: Row,
    dirty: BTreeSet<String>,
    persisted: bool,
}

impl Node {
    /// A fresh, unsaved node; every given attribute starts out dirty.
    pub(crate) fn new(schema: Arc<TreeSchema>, attributes: Row) -> Self {
        let dirty = attributes.keys().cloned().collect();
        Node {
            schema,
            attributes,
            dirty,
            persisted: false,
        }
    }

    /// A node hydrated from a stored row.
    pub(crate) fn from_row(schema: Arc<TreeSchema>, row: Row) -> Self {
        Node {
            schema,
            attributes: row,
            dirty: BTreeSet::new(),
            persisted: true,
        }
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn get(&self, column: &str) -> &Value {
        self.attributes.get(column).unwrap_or(&Value::Null)
    }

    /// Write an attribute, flagging the column dirty when the value changed.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.get(column) != &value {
            self.attributes.insert(column.to_owned(), value);
            self.dirty.insert(column.to_owned());
        }
    }

    /// Write an attribute without touching the dirty set; used by the
    /// engine when echoing store-side changes back into the handle.
    pub(crate) fn put(&mut self, column: &str, value: Value) {
        self.attributes.insert(column.to_owned(), value);
    }

    /// Replace the whole attribute bag with a freshly loaded row.
    pub(crate) fn replace(&mut self, row: Row) {
        self.attributes = row;
        self.dirty.clear();
        self.persisted = true;
    }

    pub fn is_dirty(&self, column: &str) -> bool {
        self.dirty.contains(column)
    }

    pub(crate) fn dirty_columns(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    pub(crate) fn mark_removed(&mut self) {
        self.persisted = false;
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn key(&self) -> &Value {
        self.attributes
            .get(&self.schema.primary_key)
            .unwrap_or(&Value::Null)
    }

    pub fn parent_key(&self) -> &Value {
        self.attributes
            .get(&self.schema.parent)
            .unwrap_or(&Value::Null)
    }

    fn bound(&self, column: &str) -> i64 {
        self.attributes
            .get(column)
            .and_then(Value::as_integer)
            .unwrap_or(0)
    }

    pub fn left(&self) -> i64 {
        self.bound(&self.schema.left)
    }

    pub fn right(&self) -> i64 {
        self.bound(&self.schema.right)
    }

    pub fn depth(&self) -> i64 {
        self.bound(&self.schema.depth)
    }

    pub fn order_value(&self) -> &Value {
        self.attributes
            .get(self.schema.order_column())
            .unwrap_or(&Value::Null)
    }

    pub fn scope_values(&self) -> Vec<(String, Value)> {
        self.schema
            .scope
            .iter()
            .map(|column| (column.clone(), self.get(column).clone()))
            .collect()
    }

    /// Whether the soft-delete marker is set on this handle.
    pub fn is_masked(&self) -> bool {
        match &self.schema.soft_delete {
            Some(column) => !self.get(column).is_null(),
            None => false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_key().is_null()
    }

    pub fn is_leaf(&self) -> bool {
        self.persisted && self.right() - self.left() == 1
    }

    pub fn is_trunk(&self) -> bool {
        self.persisted && !self.is_root() && !self.is_leaf()
    }

    /// Number of descendants, straight from the bounds.
    pub fn descendant_count(&self) -> i64 {
        (self.right() - self.left() - 1) / 2
    }

    /// Identity by primary key plus full attribute equality.
    pub fn equals(&self, other: &Node) -> bool {
        self.key() == other.key() && self.attributes == other.attributes
    }

    pub fn in_same_scope(&self, other: &Node) -> bool {
        self.schema
            .scope
            .iter()
            .all(|column| self.get(column) == other.get(column))
    }

    /// Both bounds fall within the other node's closed bound interval.
    pub fn inside_subtree(&self, other: &Node) -> bool {
        self.left() >= other.left()
            && self.left() <= other.right()
            && self.right() >= other.left()
            && self.right() <= other.right()
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.left() < other.left() && self.right() > other.right() && self.in_same_scope(other)
    }

    pub fn is_self_or_ancestor_of(&self, other: &Node) -> bool {
        self.left() <= other.left() && self.right() >= other.right() && self.in_same_scope(other)
    }

    pub fn is_descendant_of(&self, other: &Node) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn is_self_or_descendant_of(&self, other: &Node) -> bool {
        other.is_self_or_ancestor_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<TreeSchema> {
        Arc::new(TreeSchema::new("categories").with_scope("company_id"))
    }

    fn node(pairs: &[(&str, Value)]) -> Node {
        let row: Row = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Node::from_row(schema(), row)
    }

    fn bounds_node(left: i64, right: i64, depth: i64, scope: i64) -> Node {
        node(&[
            ("id", Value::Integer(left)),
            ("parent_id", Value::Null),
            ("lft", Value::Integer(left)),
            ("rgt", Value::Integer(right)),
            ("depth", Value::Integer(depth)),
            ("company_id", Value::Integer(scope)),
        ])
    }

    #[test]
    fn test_capability_checks() {
        let root = bounds_node(1, 10, 0, 1);
        let mut trunk = bounds_node(2, 5, 1, 1);
        trunk.put("parent_id", Value::Integer(1));
        let mut leaf = bounds_node(3, 4, 2, 1);
        leaf.put("parent_id", Value::Integer(2));

        assert!(root.is_root());
        assert!(!root.is_leaf());
        assert!(trunk.is_trunk());
        assert!(leaf.is_leaf());
        assert!(!leaf.is_trunk());
        assert_eq!(root.descendant_count(), 4);
        assert_eq!(leaf.descendant_count(), 0);

        assert!(root.equals(&root.clone()));
        assert!(!root.equals(&trunk));
    }

    #[test]
    fn test_interval_predicates() {
        let root = bounds_node(1, 10, 0, 1);
        let inner = bounds_node(2, 5, 1, 1);
        let foreign = bounds_node(2, 5, 1, 2);

        assert!(inner.inside_subtree(&root));
        assert!(!root.inside_subtree(&inner));
        assert!(root.inside_subtree(&root));

        assert!(root.is_ancestor_of(&inner));
        assert!(!root.is_ancestor_of(&root));
        assert!(root.is_self_or_ancestor_of(&root));
        assert!(inner.is_descendant_of(&root));

        // Same bounds, different scope: no relation
        assert!(!root.is_ancestor_of(&foreign));
        assert!(!foreign.in_same_scope(&root));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut n = bounds_node(1, 2, 0, 1);
        assert!(!n.is_dirty("parent_id"));
        n.set("parent_id", Value::Integer(9));
        assert!(n.is_dirty("parent_id"));

        // Writing the same value back does not re-flag a clean column
        let mut clean = bounds_node(1, 2, 0, 1);
        clean.set("company_id", Value::Integer(1));
        assert!(!clean.is_dirty("company_id"));

        clean.replace(n.attributes().clone());
        assert!(!clean.is_dirty("parent_id"));
    }
}
