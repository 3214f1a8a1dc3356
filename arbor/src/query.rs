//! Structural query predicates over the backing table, derived from the
//! bounds. Every builder is restricted to the scope of its anchor node and,
//! in soft-delete mode, to unmasked rows unless `with_masked` is called.

use std::sync::Arc;

use storage::{Direction, LockMode, Predicate, Query, Value};

use crate::node::Node;
use crate::schema::TreeSchema;

#[derive(Debug, Clone)]
pub struct TreeQuery {
    schema: Arc<TreeSchema>,
    predicates: Vec<Predicate>,
    order_by: Vec<(String, Direction)>,
    limit: Option<usize>,
    lock: LockMode,
    include_masked: bool,
}

/// Scope equality clauses for a node; a null scope value matches via
/// `IS NULL` since equality against null never holds.
pub(crate) fn scope_predicates(schema: &TreeSchema, node: &Node) -> Vec<Predicate> {
    schema
        .scope
        .iter()
        .map(|column| match node.get(column) {
            Value::Null => Predicate::IsNull(column.clone()),
            value => Predicate::Eq(column.clone(), value.clone()),
        })
        .collect()
}

impl TreeQuery {
    pub(crate) fn new(schema: Arc<TreeSchema>) -> Self {
        TreeQuery {
            schema,
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            lock: LockMode::None,
            include_masked: false,
        }
    }

    pub(crate) fn scoped_to(schema: Arc<TreeSchema>, node: &Node) -> Self {
        let mut query = TreeQuery::new(schema);
        query.predicates = scope_predicates(&query.schema, node);
        query
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// `parent IS NULL`.
    pub fn roots(self) -> Self {
        let parent = self.schema.parent.clone();
        self.filter(Predicate::IsNull(parent))
    }

    /// `right − left = 1`.
    pub fn all_leaves(self) -> Self {
        let (left, right) = (self.schema.left.clone(), self.schema.right.clone());
        self.filter(Predicate::DiffEq(right, left, 1))
    }

    /// Leaves within the node's subtree, the node included when it is one.
    pub fn leaves_of(self, node: &Node) -> Self {
        let left = self.schema.left.clone();
        self.all_leaves()
            .filter(Predicate::Ge(left.clone(), Value::Integer(node.left())))
            .filter(Predicate::Lt(left, Value::Integer(node.right())))
    }

    /// Non-root internal nodes.
    pub fn all_trunks(self) -> Self {
        let parent = self.schema.parent.clone();
        let (left, right) = (self.schema.left.clone(), self.schema.right.clone());
        self.filter(Predicate::IsNotNull(parent))
            .filter(Predicate::DiffNe(right, left, 1))
    }

    pub fn trunks_of(self, node: &Node) -> Self {
        self.all_trunks().descendants_of(node)
    }

    pub fn without_node(self, node: &Node) -> Self {
        let primary_key = self.schema.primary_key.clone();
        self.filter(Predicate::Ne(primary_key, node.key().clone()))
    }

    pub fn without_self(self, node: &Node) -> Self {
        self.without_node(node)
    }

    /// `left ≤ node.left ∧ right ≥ node.right`.
    pub fn ancestors_and_self_of(self, node: &Node) -> Self {
        let (left, right) = (self.schema.left.clone(), self.schema.right.clone());
        self.filter(Predicate::Le(left, Value::Integer(node.left())))
            .filter(Predicate::Ge(right, Value::Integer(node.right())))
    }

    pub fn ancestors_of(self, node: &Node) -> Self {
        self.ancestors_and_self_of(node).without_node(node)
    }

    /// `left ≥ node.left ∧ left < node.right`.
    pub fn descendants_and_self_of(self, node: &Node) -> Self {
        let left = self.schema.left.clone();
        self.filter(Predicate::Ge(left.clone(), Value::Integer(node.left())))
            .filter(Predicate::Lt(left, Value::Integer(node.right())))
    }

    pub fn descendants_of(self, node: &Node) -> Self {
        self.descendants_and_self_of(node).without_node(node)
    }

    pub fn siblings_and_self_of(self, node: &Node) -> Self {
        let parent = self.schema.parent.clone();
        let clause = match node.parent_key() {
            Value::Null => Predicate::IsNull(parent),
            key => Predicate::Eq(parent, key.clone()),
        };
        self.filter(clause)
    }

    pub fn siblings_of(self, node: &Node) -> Self {
        self.siblings_and_self_of(node).without_node(node)
    }

    /// Immediate children: `parent = node.id`.
    pub fn children_of(self, node: &Node) -> Self {
        let parent = self.schema.parent.clone();
        self.filter(Predicate::Eq(parent, node.key().clone()))
    }

    /// `depth BETWEEN base AND base + levels`.
    pub fn limit_depth(self, base: i64, levels: i64) -> Self {
        let depth = self.schema.depth.clone();
        self.filter(Predicate::Between(
            depth,
            Value::Integer(base),
            Value::Integer(base + levels),
        ))
    }

    /// Include soft-deleted rows.
    pub fn with_masked(mut self) -> Self {
        self.include_masked = true;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn lock_shared(mut self) -> Self {
        self.lock = LockMode::Shared;
        self
    }

    pub fn lock_exclusive(mut self) -> Self {
        self.lock = LockMode::Exclusive;
        self
    }

    /// Lower into a storage query. The order column ascending is the
    /// default ordering when none was requested.
    pub(crate) fn into_query(self) -> Query {
        let mut predicates = self.predicates;
        if !self.include_masked {
            if let Some(masked) = &self.schema.soft_delete {
                predicates.push(Predicate::IsNull(masked.clone()));
            }
        }
        let mut query = Query::filter(Predicate::And(predicates));
        query.order_by = if self.order_by.is_empty() {
            vec![(self.schema.order_column().to_owned(), Direction::Asc)]
        } else {
            self.order_by
        };
        query.limit = self.limit;
        query.lock = self.lock;
        query
    }
}
