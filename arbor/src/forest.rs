//! Fold a flat result set into a nested in-memory forest by following the
//! parent pointers. Rows whose parent is absent from the set become roots
//! of the returned forest, so any subtree slice folds cleanly.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use storage::Value;

use crate::node::Node;

#[derive(Debug, Clone)]
pub struct ForestNode {
    pub node: Node,
    pub children: Vec<ForestNode>,
}

/// Assemble in the order the rows arrived.
pub fn assemble(nodes: Vec<Node>) -> Vec<ForestNode> {
    let keys: HashSet<Value> = nodes.iter().map(|node| node.key().clone()).collect();
    let mut by_parent: IndexMap<Value, Vec<Node>> = IndexMap::new();
    let mut roots: Vec<Node> = Vec::new();

    for node in nodes {
        let parent = node.parent_key().clone();
        if parent.is_null() || !keys.contains(&parent) {
            roots.push(node);
        } else {
            by_parent.entry(parent).or_default().push(node);
        }
    }

    fn attach(node: Node, by_parent: &mut IndexMap<Value, Vec<Node>>) -> ForestNode {
        let children = by_parent
            .shift_remove(node.key())
            .unwrap_or_default()
            .into_iter()
            .map(|child| attach(child, by_parent))
            .collect();
        ForestNode { node, children }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut by_parent))
        .collect()
}

/// Assemble after sorting the set by the order column.
pub fn assemble_ordered(mut nodes: Vec<Node>) -> Vec<ForestNode> {
    nodes.sort_by(|a, b| {
        a.order_value()
            .compare(b.order_value())
            .unwrap_or(Ordering::Equal)
    });
    assemble(nodes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storage::Row;

    use super::*;
    use crate::schema::TreeSchema;

    fn node(schema: &Arc<TreeSchema>, id: i64, parent: Option<i64>, left: i64) -> Node {
        let row: Row = [
            ("id".to_owned(), Value::Integer(id)),
            (
                "parent_id".to_owned(),
                parent.map_or(Value::Null, Value::Integer),
            ),
            ("lft".to_owned(), Value::Integer(left)),
        ]
        .into_iter()
        .collect();
        Node::from_row(schema.clone(), row)
    }

    #[test]
    fn test_assemble_builds_forest() {
        let schema = Arc::new(TreeSchema::new("categories"));
        let nodes = vec![
            node(&schema, 1, None, 1),
            node(&schema, 2, Some(1), 2),
            node(&schema, 3, Some(2), 3),
            node(&schema, 4, None, 7),
        ];
        let forest = assemble(nodes);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].node.key(), &Value::Integer(1));
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].children.len(), 1);
        assert!(forest[1].children.is_empty());
    }

    #[test]
    fn test_orphans_become_roots() {
        let schema = Arc::new(TreeSchema::new("categories"));
        // Parent 9 is not part of the slice
        let nodes = vec![node(&schema, 2, Some(9), 4), node(&schema, 3, Some(2), 5)];
        let forest = assemble(nodes);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].node.key(), &Value::Integer(2));
        assert_eq!(forest[0].children.len(), 1);
    }

    #[test]
    fn test_assemble_ordered_sorts_by_order_column() {
        let schema = Arc::new(TreeSchema::new("categories"));
        let nodes = vec![
            node(&schema, 1, None, 9),
            node(&schema, 2, None, 1),
            node(&schema, 3, None, 5),
        ];
        let forest = assemble_ordered(nodes);
        let keys: Vec<_> = forest.iter().map(|f| f.node.key().clone()).collect();
        assert_eq!(
            keys,
            vec![Value::Integer(2), Value::Integer(3), Value::Integer(1)]
        );
    }
}
