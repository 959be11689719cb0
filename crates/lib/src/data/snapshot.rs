use std::sync::Arc;

use serde_json::Value;

use super::{Index, children_of, get_path, priority_of, split_path, strip_export};
use crate::backend::BackingRef;

/// How a snapshot orders its children during iteration.
#[derive(Debug, Clone, Default)]
pub enum ChildOrder {
    /// Backing store key order.
    #[default]
    Key,
    /// Order of a query index.
    Index(Index),
    /// A fixed sequence of keys; children not listed are skipped.
    Explicit(Arc<[String]>),
}

/// An immutable view of one node of the backing store at one point in time.
///
/// The node is kept in export form, see [`crate::data`].
#[derive(Debug, Clone)]
pub struct DataSnapshot {
    key: Option<String>,
    node: Value,
    order: ChildOrder,
    reference: Arc<dyn BackingRef>,
}

impl DataSnapshot {
    /// Creates a snapshot of `node` as seen at `reference`.
    pub fn new(reference: Arc<dyn BackingRef>, node: Value) -> Self {
        Self {
            key: reference.key(),
            node,
            order: ChildOrder::Key,
            reference,
        }
    }

    /// Replaces the child iteration order.
    pub fn with_order(mut self, order: ChildOrder) -> Self {
        self.order = order;
        self
    }

    /// The key of the location, `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The plain value, priorities removed.
    pub fn val(&self) -> Value {
        strip_export(&self.node)
    }

    /// The value in export form.
    pub fn export_val(&self) -> Value {
        self.node.clone()
    }

    /// Borrows the exported node.
    pub fn node(&self) -> &Value {
        &self.node
    }

    pub fn exists(&self) -> bool {
        !self.node.is_null()
    }

    pub fn priority(&self) -> Value {
        priority_of(&self.node)
    }

    /// Snapshot of a descendant location; `path` may contain `/`.
    ///
    /// Missing descendants yield an empty snapshot, never an error.
    pub fn child(&self, path: &str) -> DataSnapshot {
        let components = split_path(path);
        let node = get_path(&self.node, &components)
            .cloned()
            .unwrap_or(Value::Null);
        DataSnapshot::new(self.reference.child(path), node)
    }

    pub fn has_child(&self, path: &str) -> bool {
        get_path(&self.node, &split_path(path)).is_some_and(|node| !node.is_null())
    }

    pub fn has_children(&self) -> bool {
        self.num_children() > 0
    }

    pub fn num_children(&self) -> usize {
        self.child_keys().len()
    }

    /// The keys of the children in iteration order.
    pub fn child_keys(&self) -> Vec<String> {
        match &self.order {
            ChildOrder::Explicit(keys) => keys
                .iter()
                .filter(|key| self.has_child(key))
                .cloned()
                .collect(),
            order => {
                let mut entries = children_of(&self.node);
                match order {
                    ChildOrder::Index(index) => index.sort(&mut entries),
                    _ => Index::Key.sort(&mut entries),
                }
                entries.into_iter().map(|(key, _)| key).collect()
            }
        }
    }

    /// Calls `f` for each child in order. Returns true if `f` stopped the
    /// iteration by returning true.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(DataSnapshot) -> bool,
    {
        for key in self.child_keys() {
            if f(self.child(&key)) {
                return true;
            }
        }
        false
    }

    /// The location this snapshot was taken at.
    pub fn reference(&self) -> Arc<dyn BackingRef> {
        Arc::clone(&self.reference)
    }
}
