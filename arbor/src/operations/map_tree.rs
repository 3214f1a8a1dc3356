//! Reconcile a caller-supplied nested document with the persisted tree.
//! Each input record is a JSON object of attributes with a reserved
//! `children` key; records are created or updated in input order under the
//! running parent, leftover descendants of the receiver are removed, and
//! the bounds are rebuilt at the end.

use std::collections::HashSet;

use serde_json::Value as JsonValue;
use storage::{RecordStorage, Row, Value};
use tracing::debug;

use crate::node::Node;
use crate::{Arbor, Error};

const CHILDREN_KEY: &str = "children";

impl<S: RecordStorage> Arbor<S> {
    /// Map a document at the top level of the forest. Purely additive:
    /// nothing outside the document is removed, and only the scope
    /// partitions the document lands in get their bounds rebuilt.
    pub fn build_tree(&self, items: &[JsonValue]) -> Result<(), Error> {
        self.transaction(|| {
            let mut scopes = Vec::new();
            self.map_level(None, items, &mut HashSet::new(), &mut scopes)?;
            for scope in &scopes {
                self.rebuild_scope_tuple(scope)?;
            }
            Ok(())
        })
    }

    /// Map a document as the subtree of `receiver`: upsert what the
    /// document names, drop the receiver's other descendants.
    pub fn map_tree(&self, receiver: &Node, items: &[JsonValue]) -> Result<(), Error> {
        self.transaction(|| {
            // Keys of every row the document maps to, generated ones included
            let mut kept = HashSet::new();
            let mut scopes = Vec::new();
            self.map_level(Some(receiver), items, &mut kept, &mut scopes)?;

            let mut fresh = receiver.clone();
            self.reload(&mut fresh)?;
            let orphans: Vec<Value> = self
                .descendants(&fresh)?
                .into_iter()
                .filter(|descendant| !kept.contains(descendant.key()))
                .map(|descendant| descendant.key().clone())
                .collect();
            debug!("removing {} unmapped descendants", orphans.len());
            for key in orphans {
                // An earlier removal may have taken this row with its subtree
                if let Ok(mut orphan) = self.find(&key) {
                    self.delete(&mut orphan)?;
                }
            }
            // Only the receiver's partition was touched; cross-scope records
            // in the document would have failed the move guards above
            self.rebuild_scope_of(&fresh)
        })
    }

    fn map_level(
        &self,
        parent: Option<&Node>,
        items: &[JsonValue],
        kept: &mut HashSet<Value>,
        scopes: &mut Vec<Vec<(String, Value)>>,
    ) -> Result<(), Error> {
        for item in items {
            let object = item.as_object().ok_or_else(|| {
                Error::CorruptedData("tree mapper input must be an array of objects".to_owned())
            })?;

            let mut attributes = Row::new();
            for (column, value) in object {
                if column == CHILDREN_KEY || self.schema.is_structural(column) {
                    continue;
                }
                attributes.insert(column.clone(), json_to_value(value)?);
            }

            let node = self.map_record(parent, attributes)?;
            kept.insert(node.key().clone());
            let scope = node.scope_values();
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
            match object.get(CHILDREN_KEY) {
                None => {}
                Some(JsonValue::Array(children)) => {
                    self.map_level(Some(&node), children, kept, scopes)?
                }
                Some(other) => {
                    return Err(Error::CorruptedData(format!(
                        "children must be an array, got {other}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn map_record(&self, parent: Option<&Node>, attributes: Row) -> Result<Node, Error> {
        let parent_column = self.schema.parent.clone();
        let parent_key = parent.map_or(Value::Null, |p| p.key().clone());

        let existing = match attributes.get(&self.schema.primary_key) {
            Some(key) if !key.is_null() => self.find(key).ok(),
            _ => None,
        };
        match existing {
            Some(mut node) => {
                for (column, value) in &attributes {
                    node.set(column, value.clone());
                }
                node.set(&parent_column, parent_key);
                self.save(&mut node)?;
                Ok(node)
            }
            None => {
                let mut attributes = attributes;
                attributes.insert(parent_column, parent_key);
                self.create(attributes)
            }
        }
    }
}

fn json_to_value(value: &JsonValue) -> Result<Value, Error> {
    match value {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(flag) => Ok(Value::Bool(*flag)),
        JsonValue::Number(number) => number
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| Error::CorruptedData(format!("unsupported numeric attribute: {number}"))),
        JsonValue::String(text) => Ok(Value::Text(text.clone())),
        other => Err(Error::CorruptedData(format!(
            "unsupported attribute value: {other}"
        ))),
    }
}
