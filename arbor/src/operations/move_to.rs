//! The move engine. A node (and its whole subtree) is relocated to an
//! arbitrary position with a single conditional bounds-rewriting update:
//! the sorted boundary quadruple `(a, b, c, d)` delimits two disjoint
//! intervals whose bounds are shifted against each other, and the parent
//! pointer is rewritten in the same statement.

use storage::sql::{render_update, Grammar};
use storage::{Assign, LockMode, Predicate, RecordStorage, Value};
use tracing::debug;

use crate::events::MoveEvent;
use crate::node::Node;
use crate::operations::timestamp_now;
use crate::schema::UPDATED_AT_COLUMN;
use crate::{Arbor, Error};

/// Placement of the moved subtree relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Append under the target.
    Child,
    /// Immediately before the target.
    Left,
    /// Immediately after the target.
    Right,
    /// Detach to the top level of the scope.
    Root,
}

impl<S: RecordStorage> Arbor<S> {
    /// Relocate `node` relative to `target`. Vetoed and structurally
    /// ineffective moves are clean no-ops; the handle is reloaded after a
    /// real move, while `target` goes stale and is the caller's to refresh.
    pub fn move_to(
        &self,
        node: &mut Node,
        target: Option<&Node>,
        position: Position,
    ) -> Result<(), Error> {
        self.guard_move(node, target, position)?;

        let event = MoveEvent {
            node: &*node,
            target,
            position,
        };
        if !self.events().until_moving(&event) {
            return Ok(());
        }

        // Everything from the endpoint reads to the bound rewrite happens
        // inside one transaction, so the quadruple is never computed from
        // state another writer can still change underneath the update.
        let schema = self.schema.clone();
        let fresh_target = self.transaction(|| {
            self.reload(node)?;
            let fresh_target = match target {
                Some(given) => Some(
                    self.find(given.key())
                        .map_err(|_| Error::MoveNotPossible("move target does not resolve"))?,
                ),
                None => None,
            };
            // The reloads may have shifted either endpoint; check again.
            self.guard_move(node, fresh_target.as_ref(), position)?;

            let raw_bound = match (position, fresh_target.as_ref()) {
                (Position::Child, Some(t)) => t.right(),
                (Position::Left, Some(t)) => t.left(),
                (Position::Right, Some(t)) => t.right() + 1,
                (Position::Root, _) => self.tail_right(node, LockMode::None)? + 1,
                _ => unreachable!("guard ensures a target for non-root positions"),
            };

            let left = node.left();
            let right = node.right();
            let bound1 = if raw_bound > right {
                raw_bound - 1
            } else {
                raw_bound
            };
            let bound2 = if bound1 > right { right + 1 } else { left - 1 };

            // Landing on either own bound means the tree already has this
            // shape: skip the rewrite
            if bound1 == left || bound1 == right {
                return Ok(fresh_target);
            }

            let mut quadruple = [left, right, bound1, bound2];
            quadruple.sort_unstable();
            let [a, b, c, d] = quadruple;

            let new_parent = match (position, fresh_target.as_ref()) {
                (Position::Root, _) => Value::Null,
                (Position::Child, Some(t)) => t.key().clone(),
                (_, Some(t)) => t.parent_key().clone(),
                _ => unreachable!("guard ensures a target for non-root positions"),
            };

            let span = Predicate::Or(vec![
                Predicate::Between(schema.left.clone(), Value::Integer(a), Value::Integer(d)),
                Predicate::Between(schema.right.clone(), Value::Integer(a), Value::Integer(d)),
            ]);

            // Row-range lock over every row the rewrite will touch
            self.nodes(
                self.query_for(node)
                    .filter(span.clone())
                    .lock_exclusive(),
            )?;

            let mut assigns = vec![
                Assign::ShiftSpans {
                    column: schema.left.clone(),
                    lower: (a, b),
                    lower_delta: d - b,
                    upper: (c, d),
                    upper_delta: a - c,
                },
                Assign::ShiftSpans {
                    column: schema.right.clone(),
                    lower: (a, b),
                    lower_delta: d - b,
                    upper: (c, d),
                    upper_delta: a - c,
                },
                Assign::SetWhere {
                    column: schema.parent.clone(),
                    key_column: schema.primary_key.clone(),
                    key: node.key().clone(),
                    value: new_parent.clone(),
                },
            ];
            if schema.timestamps {
                assigns.push(Assign::Set(UPDATED_AT_COLUMN.to_owned(), timestamp_now()));
            }

            let query = self.query_for(node).filter(span).into_query();
            debug!(
                "rewriting bounds: {}",
                render_update(&Grammar::default(), &schema.table, &query, &assigns)
            );
            self.store.update(&schema.table, &query, &assigns)?;

            self.set_depth_with_subtree(node)?;
            self.reload(node)?;
            Ok(fresh_target)
        })?;

        let event = MoveEvent {
            node: &*node,
            target: fresh_target.as_ref(),
            position,
        };
        self.events().notify_moved(&event);
        Ok(())
    }

    fn guard_move(
        &self,
        node: &Node,
        target: Option<&Node>,
        position: Position,
    ) -> Result<(), Error> {
        if !node.is_persisted() {
            return Err(Error::MoveNotPossible(
                "a new node cannot be moved until it is persisted",
            ));
        }
        if position == Position::Root {
            return Ok(());
        }
        let target = target.ok_or(Error::MoveNotPossible(
            "a target node is required for this position",
        ))?;
        if !target.is_persisted() {
            return Err(Error::MoveNotPossible("the move target must be persisted"));
        }
        if node.key() == target.key() {
            return Err(Error::MoveNotPossible(
                "a node cannot be moved relative to itself",
            ));
        }
        if target.inside_subtree(node) {
            return Err(Error::MoveNotPossible(
                "the move target is inside the subtree being moved",
            ));
        }
        if !target.in_same_scope(node) {
            return Err(Error::MoveNotPossible(
                "the move target belongs to a different scope",
            ));
        }
        Ok(())
    }

    /// Resolve the target freshly from the store by primary key.
    pub fn move_to_key(
        &self,
        node: &mut Node,
        key: &Value,
        position: Position,
    ) -> Result<(), Error> {
        let target = self
            .find(key)
            .map_err(|_| Error::MoveNotPossible("move target does not resolve"))?;
        self.move_to(node, Some(&target), position)
    }

    pub fn make_child_of(&self, node: &mut Node, target: &Node) -> Result<(), Error> {
        self.move_to(node, Some(target), Position::Child)
    }

    pub fn make_last_child_of(&self, node: &mut Node, target: &Node) -> Result<(), Error> {
        self.make_child_of(node, target)
    }

    /// Prepend under the target: left of its first child, or a plain
    /// child move when the target has none.
    pub fn make_first_child_of(&self, node: &mut Node, target: &Node) -> Result<(), Error> {
        match self.children(target)?.into_iter().next() {
            None => self.make_child_of(node, target),
            Some(first) if first.key() == node.key() => Ok(()),
            Some(first) => self.move_to_left_of(node, &first),
        }
    }

    pub fn move_to_left_of(&self, node: &mut Node, target: &Node) -> Result<(), Error> {
        self.move_to(node, Some(target), Position::Left)
    }

    pub fn move_to_right_of(&self, node: &mut Node, target: &Node) -> Result<(), Error> {
        self.move_to(node, Some(target), Position::Right)
    }

    /// Detach the subtree to the top level of its scope.
    pub fn make_root(&self, node: &mut Node) -> Result<(), Error> {
        self.move_to(node, None, Position::Root)
    }

    /// Swap with the sibling immediately to the left.
    pub fn move_left(&self, node: &mut Node) -> Result<(), Error> {
        let sibling = self
            .left_sibling(node)?
            .ok_or(Error::MoveNotPossible("node has no left sibling"))?;
        self.move_to_left_of(node, &sibling)
    }

    /// Swap with the sibling immediately to the right.
    pub fn move_right(&self, node: &mut Node) -> Result<(), Error> {
        let sibling = self
            .right_sibling(node)?
            .ok_or(Error::MoveNotPossible("node has no right sibling"))?;
        self.move_to_right_of(node, &sibling)
    }

    /// Refresh the depth cache of the node itself.
    pub fn set_depth(&self, node: &mut Node) -> Result<(), Error> {
        let schema = self.schema.clone();
        self.transaction(|| {
            self.reload(node)?;
            let level = self.level_of(node)?;
            if node.depth() != level {
                self.update_where(
                    self.query().filter(Predicate::Eq(
                        schema.primary_key.clone(),
                        node.key().clone(),
                    )),
                    &[Assign::Set(schema.depth.clone(), Value::Integer(level))],
                )?;
                node.put(&schema.depth, Value::Integer(level));
            }
            Ok(())
        })
    }

    /// Refresh the depth cache of the node and shift its whole subtree by
    /// the same delta.
    pub fn set_depth_with_subtree(&self, node: &mut Node) -> Result<(), Error> {
        let schema = self.schema.clone();
        self.transaction(|| {
            self.reload(node)?;
            let old_depth = node.depth();
            let level = self.level_of(node)?;
            if level == old_depth {
                return Ok(());
            }

            // Write-lock the subtree before renumbering its depths
            self.nodes(
                self.query_for(node)
                    .descendants_and_self_of(node)
                    .lock_exclusive(),
            )?;
            self.update_where(
                self.query().filter(Predicate::Eq(
                    schema.primary_key.clone(),
                    node.key().clone(),
                )),
                &[Assign::Set(schema.depth.clone(), Value::Integer(level))],
            )?;
            node.put(&schema.depth, Value::Integer(level));

            if !node.is_leaf() {
                self.update_where(
                    self.query_for(node).descendants_of(node),
                    &[Assign::Increment(schema.depth.clone(), level - old_depth)],
                )?;
            }
            Ok(())
        })
    }
}
