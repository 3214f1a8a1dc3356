//! Column and scope configuration for one tree-indexed table.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_PARENT_COLUMN: &str = "parent_id";
pub const DEFAULT_LEFT_COLUMN: &str = "lft";
pub const DEFAULT_RIGHT_COLUMN: &str = "rgt";
pub const DEFAULT_DEPTH_COLUMN: &str = "depth";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Names of the structural columns of a tree table plus the scope columns
/// that partition it into independent forests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSchema {
    pub table: String,
    pub primary_key: String,
    pub parent: String,
    pub left: String,
    pub right: String,
    pub depth: String,
    /// Explicit ordering column; the left bound doubles as the order key
    /// when unset.
    pub order: Option<String>,
    pub scope: Vec<String>,
    pub timestamps: bool,
    /// Soft-delete marker column; deletes mask rows instead of removing
    /// them when set.
    pub soft_delete: Option<String>,
}

impl TreeSchema {
    pub fn new(table: impl Into<String>) -> Self {
        TreeSchema {
            table: table.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_owned(),
            parent: DEFAULT_PARENT_COLUMN.to_owned(),
            left: DEFAULT_LEFT_COLUMN.to_owned(),
            right: DEFAULT_RIGHT_COLUMN.to_owned(),
            depth: DEFAULT_DEPTH_COLUMN.to_owned(),
            order: None,
            scope: Vec::new(),
            timestamps: false,
            soft_delete: None,
        }
    }

    pub fn with_order(mut self, column: impl Into<String>) -> Self {
        self.order = Some(column.into());
        self
    }

    pub fn with_scope(mut self, column: impl Into<String>) -> Self {
        self.scope.push(column.into());
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn with_soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    pub fn order_column(&self) -> &str {
        self.order.as_deref().unwrap_or(&self.left)
    }

    pub fn is_scoped(&self) -> bool {
        !self.scope.is_empty()
    }

    /// Table-qualified form, for embedding in raw SQL fragments.
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// Bounds and depth are owned by the engine and never writable through
    /// attribute input (the mapper skips them, for one).
    pub fn is_structural(&self, column: &str) -> bool {
        column == self.left || column == self.right || column == self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let schema = TreeSchema::new("categories");
        assert_eq!(schema.primary_key, "id");
        assert_eq!(schema.parent, "parent_id");
        assert_eq!(schema.left, "lft");
        assert_eq!(schema.right, "rgt");
        assert_eq!(schema.order_column(), "lft");
        assert!(!schema.is_scoped());
        assert_eq!(schema.qualified("lft"), "categories.lft");
    }

    #[test]
    fn test_order_fallback_and_scope() {
        let schema = TreeSchema::new("menus")
            .with_order("position")
            .with_scope("site_id");
        assert_eq!(schema.order_column(), "position");
        assert!(schema.is_scoped());
        assert!(schema.is_structural("lft"));
        assert!(!schema.is_structural("position"));
    }
}
