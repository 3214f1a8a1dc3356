//! Create/save lifecycle. Creation parks the new row at the tail of its
//! scope (bounds read under a shared lock); saving captures a pending-move
//! slot while the parent column is dirty and performs the reparenting after
//! the row itself is written, all inside one outer transaction.

use storage::{Assign, Direction, LockMode, RecordStorage, Row, Value};
use tracing::debug;

use crate::events::Action;
use crate::node::Node;
use crate::operations::timestamp_now;
use crate::schema::{CREATED_AT_COLUMN, UPDATED_AT_COLUMN};
use crate::{Arbor, Error};

impl<S: RecordStorage> Arbor<S> {
    /// Build an unsaved handle from caller attributes.
    pub fn new_node(&self, attributes: Row) -> Node {
        self.make_node(attributes)
    }

    pub fn create(&self, attributes: Row) -> Result<Node, Error> {
        let mut node = self.make_node(attributes);
        self.save(&mut node)?;
        Ok(node)
    }

    /// Persist a handle: insert or update the row, then apply any captured
    /// parent change and recompute the depth cache.
    pub fn save(&self, node: &mut Node) -> Result<(), Error> {
        let pending = self.capture_pending_move(node);
        self.events().notify(Action::Saving, node);
        if node.is_persisted() {
            self.transaction(|| {
                self.persist_update(node)?;
                self.events().notify(Action::Saved, node);
                self.finish_save(node, pending)
            })
        } else {
            self.transaction(|| {
                self.events().notify(Action::Creating, node);
                self.assign_tail_bounds(node)?;
                self.persist_insert(node)?;
                self.events().notify(Action::Saved, node);
                self.finish_save(node, pending)
            })
        }
    }

    /// The pending-move slot: `None` means no structural change, a null
    /// value means promote to root, any other value is the new parent key.
    fn capture_pending_move(&self, node: &Node) -> Option<Value> {
        let parent_column = self.schema.parent.clone();
        if node.is_dirty(&parent_column)
            && (node.is_persisted() || !node.parent_key().is_null())
        {
            Some(node.parent_key().clone())
        } else {
            None
        }
    }

    fn assign_tail_bounds(&self, node: &mut Node) -> Result<(), Error> {
        let tail = self.tail_right(node, LockMode::Shared)?;
        let schema = self.schema.clone();
        node.put(&schema.left, Value::Integer(tail + 1));
        node.put(&schema.right, Value::Integer(tail + 2));
        node.put(&schema.depth, Value::Integer(0));
        Ok(())
    }

    /// Greatest right bound in the node's scope, `0` for an empty scope.
    pub(crate) fn tail_right(&self, node: &Node, lock: LockMode) -> Result<i64, Error> {
        let right = self.schema.right.clone();
        let mut query = self
            .query_for(node)
            .order_by(right, Direction::Desc);
        if lock == LockMode::Shared {
            query = query.lock_shared();
        }
        Ok(self.first(query)?.map(|top| top.right()).unwrap_or(0))
    }

    fn persist_insert(&self, node: &mut Node) -> Result<(), Error> {
        let schema = self.schema.clone();
        if schema.timestamps {
            let now = timestamp_now();
            node.put(CREATED_AT_COLUMN, now.clone());
            node.put(UPDATED_AT_COLUMN, now);
        }
        let key = self
            .store
            .insert(&schema.table, &schema.primary_key, node.attributes().clone())?;
        debug!("created node {:?} at tail of its scope", key);
        node.put(&schema.primary_key, key);
        node.mark_persisted();
        node.clear_dirty();
        Ok(())
    }

    fn persist_update(&self, node: &mut Node) -> Result<(), Error> {
        let schema = self.schema.clone();
        // Bounds and depth are engine-owned; direct writes to them are
        // dropped rather than persisted
        let dirty: Vec<String> = node
            .dirty_columns()
            .filter(|column| !schema.is_structural(column))
            .map(str::to_owned)
            .collect();
        if dirty.is_empty() {
            node.clear_dirty();
            return Ok(());
        }
        let mut assigns: Vec<Assign> = dirty
            .iter()
            .map(|column| Assign::Set(column.clone(), node.get(column).clone()))
            .collect();
        if schema.timestamps {
            let now = timestamp_now();
            assigns.push(Assign::Set(UPDATED_AT_COLUMN.to_owned(), now.clone()));
            node.put(UPDATED_AT_COLUMN, now);
        }
        self.update_where(
            self.query().filter(storage::Predicate::Eq(
                schema.primary_key.clone(),
                node.key().clone(),
            )),
            &assigns,
        )?;
        node.clear_dirty();
        Ok(())
    }

    fn finish_save(&self, node: &mut Node, pending: Option<Value>) -> Result<(), Error> {
        match pending {
            None => {}
            Some(Value::Null) => self.make_root(node)?,
            Some(parent_key) => {
                let target = self
                    .find(&parent_key)
                    .map_err(|_| Error::MoveNotPossible("move target does not resolve"))?;
                self.make_child_of(node, &target)?;
            }
        }
        self.set_depth(node)
    }
}
