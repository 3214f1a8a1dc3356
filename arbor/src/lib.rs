//! Nested-set tree index engine over a transactional record store.
//!
//! An ordered forest is encoded by two integer bounds per row; a node's
//! subtree is exactly the rows whose bounds nest within its own. The engine
//! keeps `left`/`right`/`parent`/`depth` globally consistent under
//! creation, deletion and arbitrary reparenting, and derives subtree,
//! ancestor, sibling and leaf queries from the bounds. Multiple independent
//! trees share one table when distinguished by scope columns.

mod events;
mod forest;
mod node;
mod operations;
mod query;
mod schema;

use std::sync::Arc;

use storage::{RecordStorage, Row, Value};

pub use crate::events::{Action, EventBus, MoveEvent};
pub use crate::forest::{assemble, assemble_ordered, ForestNode};
pub use crate::node::Node;
pub use crate::operations::move_to::Position;
pub use crate::query::TreeQuery;
pub use crate::schema::TreeSchema;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Guard failures, raised before any transactional work
    #[error("move not possible: {0}")]
    MoveNotPossible(&'static str),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    // Integrity errors
    #[error("nested set invariants violated: {0}")]
    InvariantViolated(String),
    #[error("data corruption error: {0}")]
    CorruptedData(String),
    // Irrecoverable errors
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Engine handle for one tree-indexed table.
pub struct Arbor<S: RecordStorage> {
    store: S,
    schema: Arc<TreeSchema>,
    events: EventBus,
}

impl<S: RecordStorage> Arbor<S> {
    pub fn new(store: S, schema: TreeSchema) -> Self {
        Arbor {
            store,
            schema: Arc::new(schema),
            events: EventBus::new(),
        }
    }

    pub fn schema(&self) -> &TreeSchema {
        &self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// A query over the whole table (every scope partition).
    pub fn query(&self) -> TreeQuery {
        TreeQuery::new(self.schema.clone())
    }

    /// A query restricted to the scope partition of `node`.
    pub fn query_for(&self, node: &Node) -> TreeQuery {
        TreeQuery::scoped_to(self.schema.clone(), node)
    }

    pub fn nodes(&self, query: TreeQuery) -> Result<Vec<Node>, Error> {
        let rows = self.store.select(&self.schema.table, &query.into_query())?;
        Ok(rows
            .into_iter()
            .map(|row| Node::from_row(self.schema.clone(), row))
            .collect())
    }

    pub fn first(&self, query: TreeQuery) -> Result<Option<Node>, Error> {
        Ok(self.nodes(query.limit(1))?.into_iter().next())
    }

    /// Fresh fetch by primary key; excludes masked rows.
    pub fn find(&self, key: &Value) -> Result<Node, Error> {
        let primary_key = self.schema.primary_key.clone();
        self.first(
            self.query()
                .filter(storage::Predicate::Eq(primary_key, key.clone())),
        )?
        .ok_or_else(|| Error::RecordNotFound(format!("{key:?}")))
    }

    /// Re-read the row behind a handle, masked or not.
    pub fn reload(&self, node: &mut Node) -> Result<(), Error> {
        let primary_key = self.schema.primary_key.clone();
        let fresh = self.first(
            self.query()
                .with_masked()
                .filter(storage::Predicate::Eq(primary_key, node.key().clone())),
        )?;
        match fresh {
            Some(loaded) => {
                node.replace(loaded.attributes().clone());
                Ok(())
            }
            None => Err(Error::RecordNotFound(format!("{:?}", node.key()))),
        }
    }

    /// Run `f` inside a store transaction, rolling back on error. When a
    /// transaction is already active the body runs in it directly and the
    /// outer frame stays in charge of the outcome.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.store.transaction_level() > 0 {
            return f();
        }
        self.store.begin()?;
        match f() {
            Ok(value) => {
                self.store.commit()?;
                Ok(value)
            }
            Err(error) => {
                let _ = self.store.rollback();
                Err(error)
            }
        }
    }

    pub(crate) fn update_where(
        &self,
        query: TreeQuery,
        assigns: &[storage::Assign],
    ) -> Result<u64, Error> {
        Ok(self
            .store
            .update(&self.schema.table, &query.into_query(), assigns)?)
    }

    pub(crate) fn delete_where(&self, query: TreeQuery) -> Result<u64, Error> {
        Ok(self.store.delete(&self.schema.table, &query.into_query())?)
    }

    // Convenience executors over the predicate set

    pub fn roots(&self) -> Result<Vec<Node>, Error> {
        self.nodes(self.query().roots())
    }

    pub fn children(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).children_of(node))
    }

    pub fn descendants(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).descendants_of(node))
    }

    pub fn descendants_and_self(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).descendants_and_self_of(node))
    }

    pub fn ancestors(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).ancestors_of(node))
    }

    pub fn ancestors_and_self(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).ancestors_and_self_of(node))
    }

    pub fn siblings(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).siblings_of(node))
    }

    pub fn siblings_and_self(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).siblings_and_self_of(node))
    }

    pub fn leaves(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).leaves_of(node))
    }

    pub fn trunks(&self, node: &Node) -> Result<Vec<Node>, Error> {
        self.nodes(self.query_for(node).trunks_of(node))
    }

    /// The sibling immediately to the left, when there is one.
    pub fn left_sibling(&self, node: &Node) -> Result<Option<Node>, Error> {
        let left = self.schema.left.clone();
        self.first(
            self.query_for(node)
                .siblings_of(node)
                .filter(storage::Predicate::Lt(
                    left.clone(),
                    Value::Integer(node.left()),
                ))
                .order_by(left, storage::Direction::Desc),
        )
    }

    pub fn right_sibling(&self, node: &Node) -> Result<Option<Node>, Error> {
        let left = self.schema.left.clone();
        self.first(
            self.query_for(node)
                .siblings_of(node)
                .filter(storage::Predicate::Gt(left, Value::Integer(node.left()))),
        )
    }

    /// Topmost ancestor of a persisted node (the node itself for roots).
    pub fn root_of(&self, node: &Node) -> Result<Node, Error> {
        self.first(self.query_for(node).ancestors_and_self_of(node).roots())?
            .ok_or_else(|| Error::RecordNotFound(format!("root of {:?}", node.key())))
    }

    /// Number of strict ancestors. Persisted nodes answer with one bounds
    /// query; unsaved nodes walk the parent chain instead.
    pub fn level_of(&self, node: &Node) -> Result<i64, Error> {
        if node.is_persisted() {
            if node.is_root() {
                return Ok(0);
            }
            return Ok(self.ancestors(node)?.len() as i64);
        }
        match node.parent_key() {
            Value::Null => Ok(0),
            key => {
                let parent = self.find(&key.clone())?;
                Ok(self.level_of(&parent)? + 1)
            }
        }
    }

    pub(crate) fn make_node(&self, attributes: Row) -> Node {
        Node::new(self.schema.clone(), attributes)
    }
}
