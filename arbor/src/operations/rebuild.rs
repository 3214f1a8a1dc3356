//! Rebuild bounds from parent pointers, and the dual check that the stored
//! encoding is consistent. Both walk each scope partition separately, since
//! partitions are independent forests.

use indexmap::IndexMap;
use itertools::Itertools;
use storage::{Assign, Predicate, RecordStorage, Value};
use tracing::debug;

use crate::node::Node;
use crate::schema::TreeSchema;
use crate::{Arbor, Error};

impl<S: RecordStorage> Arbor<S> {
    /// Reassign every bound and depth from the parent pointers: depth-first
    /// from the roots in order-column order, a counter handing out `left`
    /// on entry and `right` on exit. Applied twice it is a no-op.
    pub fn rebuild(&self) -> Result<(), Error> {
        self.transaction(|| {
            let nodes = self.nodes(self.query())?;
            for (scope, partition) in partition_by_scope(&self.schema, nodes) {
                debug!(
                    "rebuilding scope partition {:?} ({} rows)",
                    scope,
                    partition.len()
                );
                self.rebuild_partition(partition)?;
            }
            Ok(())
        })
    }

    /// Rebuild only the scope partition the node belongs to; other
    /// partitions keep their bounds untouched.
    pub fn rebuild_scope_of(&self, node: &Node) -> Result<(), Error> {
        self.rebuild_scope_tuple(&node.scope_values())
    }

    pub(crate) fn rebuild_scope_tuple(&self, scope: &[(String, Value)]) -> Result<(), Error> {
        self.transaction(|| {
            let mut query = self.query();
            for (column, value) in scope {
                query = query.filter(match value {
                    Value::Null => Predicate::IsNull(column.clone()),
                    value => Predicate::Eq(column.clone(), value.clone()),
                });
            }
            let partition = self.nodes(query)?;
            debug!("rebuilding scope partition {:?} ({} rows)", scope, partition.len());
            self.rebuild_partition(partition)
        })
    }

    fn rebuild_partition(&self, nodes: Vec<Node>) -> Result<(), Error> {
        let mut children: IndexMap<Value, Vec<Node>> = IndexMap::new();
        let mut roots = Vec::new();
        for node in nodes {
            if node.parent_key().is_null() {
                roots.push(node);
            } else {
                children
                    .entry(node.parent_key().clone())
                    .or_default()
                    .push(node);
            }
        }
        let mut counter = 1;
        for root in roots {
            self.renumber(root, &mut children, &mut counter, 0)?;
        }
        Ok(())
    }

    fn renumber(
        &self,
        node: Node,
        children: &mut IndexMap<Value, Vec<Node>>,
        counter: &mut i64,
        depth: i64,
    ) -> Result<(), Error> {
        let left = *counter;
        *counter += 1;
        let kids = children.shift_remove(node.key()).unwrap_or_default();
        for kid in kids {
            self.renumber(kid, children, counter, depth + 1)?;
        }
        let right = *counter;
        *counter += 1;

        if node.left() != left || node.right() != right || node.depth() != depth {
            let schema = self.schema.clone();
            self.update_where(
                self.query().filter(Predicate::Eq(
                    schema.primary_key.clone(),
                    node.key().clone(),
                )),
                &[
                    Assign::Set(schema.left.clone(), Value::Integer(left)),
                    Assign::Set(schema.right.clone(), Value::Integer(right)),
                    Assign::Set(schema.depth.clone(), Value::Integer(depth)),
                ],
            )?;
        }
        Ok(())
    }

    /// Check the invariants of every scope partition at rest: ordered
    /// bounds, a duplicate-free `{1..2N}` permutation, parents equal to the
    /// tightest strict enclosure, and depths equal to the ancestor counts.
    pub fn is_valid_nested_set(&self) -> Result<bool, Error> {
        let nodes = self.nodes(self.query())?;
        Ok(partition_by_scope(&self.schema, nodes)
            .values()
            .all(|partition| validate_partition(partition)))
    }

    pub fn assert_valid(&self) -> Result<(), Error> {
        if self.is_valid_nested_set()? {
            Ok(())
        } else {
            Err(Error::InvariantViolated(
                "bounds are inconsistent with parents or depths".to_owned(),
            ))
        }
    }
}

fn partition_by_scope(schema: &TreeSchema, nodes: Vec<Node>) -> IndexMap<Vec<Value>, Vec<Node>> {
    let mut partitions: IndexMap<Vec<Value>, Vec<Node>> = IndexMap::new();
    for node in nodes {
        let scope = schema
            .scope
            .iter()
            .map(|column| node.get(column).clone())
            .collect();
        partitions.entry(scope).or_default().push(node);
    }
    partitions
}

fn validate_partition(nodes: &[Node]) -> bool {
    let count = nodes.len() as i64;
    if nodes
        .iter()
        .any(|node| node.left() >= node.right() || (node.right() - node.left()) % 2 == 0)
    {
        return false;
    }

    let bounds = nodes
        .iter()
        .flat_map(|node| [node.left(), node.right()])
        .sorted();
    if !bounds.eq(1..=2 * count) {
        return false;
    }

    // Any two bound intervals are disjoint or strictly nested
    for (x, y) in nodes.iter().tuple_combinations() {
        let disjoint = x.right() < y.left() || y.right() < x.left();
        let nested = (x.left() < y.left() && y.right() < x.right())
            || (y.left() < x.left() && x.right() < y.right());
        if !disjoint && !nested {
            return false;
        }
    }

    for node in nodes {
        let enclosing = nodes
            .iter()
            .filter(|other| other.left() < node.left() && other.right() > node.right())
            .collect_vec();
        let tightest = enclosing.iter().max_by_key(|other| other.left());
        match (node.parent_key(), tightest) {
            (Value::Null, None) => {}
            (Value::Null, Some(_)) | (_, None) => return false,
            (parent_key, Some(parent)) => {
                if parent.key() != parent_key {
                    return false;
                }
            }
        }
        if node.depth() != enclosing.len() as i64 {
            return false;
        }
    }
    true
}
