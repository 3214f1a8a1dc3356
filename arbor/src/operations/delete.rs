//! Subtree pruning. Deleting removes a node and everything underneath it,
//! then closes the bound gap for the rows to the right. In soft-delete mode
//! the subtree is masked instead, and `restore` reopens the range before
//! unmasking the interior.

use storage::{Assign, Predicate, RecordStorage, Value};
use tracing::debug;

use crate::events::Action;
use crate::node::Node;
use crate::operations::timestamp_now;
use crate::{Arbor, Error};

impl<S: RecordStorage> Arbor<S> {
    /// Delete the node together with its whole subtree and close the gap.
    pub fn delete(&self, node: &mut Node) -> Result<(), Error> {
        if !node.is_persisted() {
            return Err(Error::RecordNotFound(
                "cannot delete a node that has not been persisted".to_owned(),
            ));
        }
        self.events().notify(Action::Deleting, node);
        let schema = self.schema.clone();
        self.transaction(|| {
            self.reload(node)?;
            let left = node.left();
            let right = node.right();
            let width = right - left + 1;

            // Write-lock everything at or to the right of the removed range
            self.nodes(
                self.query_for(node)
                    .filter(Predicate::Ge(schema.left.clone(), Value::Integer(left)))
                    .lock_exclusive(),
            )?;

            let subtree = self
                .query_for(node)
                .filter(Predicate::Ge(schema.left.clone(), Value::Integer(left)))
                .filter(Predicate::Le(schema.right.clone(), Value::Integer(right)));
            if let Some(mask) = schema.soft_delete.clone() {
                debug!("masking subtree rows within bounds {}..{}", left, right);
                self.update_where(subtree, &[Assign::Set(mask, timestamp_now())])?;
            } else {
                debug!("pruning subtree rows within bounds {}..{}", left, right);
                self.delete_where(subtree)?;
            }

            // Close the gap left behind
            self.update_where(
                self.query_for(node)
                    .filter(Predicate::Gt(schema.left.clone(), Value::Integer(right))),
                &[Assign::Increment(schema.left.clone(), -width)],
            )?;
            self.update_where(
                self.query_for(node)
                    .filter(Predicate::Gt(schema.right.clone(), Value::Integer(right))),
                &[Assign::Increment(schema.right.clone(), -width)],
            )?;
            Ok(())
        })?;

        if schema.soft_delete.is_some() {
            self.reload(node)?;
        } else {
            node.mark_removed();
        }
        Ok(())
    }

    /// Bring a soft-deleted subtree back: shift later rows to reopen the
    /// bound range, unmask the node, then unmask the descendants whose
    /// bounds lie strictly inside the restored range.
    pub fn restore(&self, node: &mut Node) -> Result<(), Error> {
        let mask = self.schema.soft_delete.clone().ok_or_else(|| {
            Error::CorruptedData("restore requires a configured soft-delete column".to_owned())
        })?;
        self.reload(node)?;
        if !node.is_masked() {
            return Ok(());
        }
        self.events().notify(Action::Restoring, node);
        let schema = self.schema.clone();
        self.transaction(|| {
            let left = node.left();
            let right = node.right();
            let width = right - left + 1;
            debug!("reopening bounds {}..{} for restore", left, right);

            self.update_where(
                self.query_for(node)
                    .filter(Predicate::Ge(schema.left.clone(), Value::Integer(left))),
                &[Assign::Increment(schema.left.clone(), width)],
            )?;
            self.update_where(
                self.query_for(node)
                    .filter(Predicate::Ge(schema.right.clone(), Value::Integer(left))),
                &[Assign::Increment(schema.right.clone(), width)],
            )?;

            // Unmask the node itself
            self.update_where(
                self.query().with_masked().filter(Predicate::Eq(
                    schema.primary_key.clone(),
                    node.key().clone(),
                )),
                &[Assign::Set(mask.clone(), Value::Null)],
            )?;
            self.reload(node)?;
            self.events().notify(Action::Restored, node);

            self.update_where(
                self.query_for(node)
                    .with_masked()
                    .filter(Predicate::IsNotNull(mask.clone()))
                    .filter(Predicate::Gt(schema.left.clone(), Value::Integer(left)))
                    .filter(Predicate::Lt(schema.right.clone(), Value::Integer(right))),
                &[Assign::Set(mask.clone(), Value::Null)],
            )?;
            Ok(())
        })
    }
}
