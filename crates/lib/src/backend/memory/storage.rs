//! Mutation of the stored tree.
//!
//! The tree is kept in canonical export form: no nulls, no empty objects and
//! no object that holds only metadata.

use serde_json::{Map, Value};

use crate::data::{get_path, is_container, is_meta_key, normalize, with_priority};

/// One mutation of a write. All operations of a write apply atomically.
#[derive(Debug, Clone)]
pub(super) enum WriteOp {
    Set(Vec<String>, Value),
    Priority(Vec<String>, Value),
}

impl WriteOp {
    pub(super) fn path(&self) -> &[String] {
        match self {
            WriteOp::Set(path, _) | WriteOp::Priority(path, _) => path,
        }
    }

    pub(super) fn apply(self, root: &mut Value) {
        match self {
            WriteOp::Set(path, value) => set_at(root, &path, normalize(value)),
            WriteOp::Priority(path, priority) => set_priority_at(root, &path, priority),
        }
    }
}

fn has_children(map: &Map<String, Value>) -> bool {
    map.keys().any(|key| !is_meta_key(key))
}

fn set_at(node: &mut Value, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !is_container(node) {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
        if child.is_null() {
            map.remove(first);
        }
        if !has_children(map) {
            *node = Value::Null;
        }
    }
}

fn set_priority_at(node: &mut Value, path: &[String], priority: Value) {
    match path.split_first() {
        None => {
            if !node.is_null() {
                *node = with_priority(node.take(), priority);
            }
        }
        Some((first, rest)) => {
            if !is_container(node) {
                return;
            }
            if let Some(child) = node.as_object_mut().and_then(|map| map.get_mut(first)) {
                set_priority_at(child, rest, priority);
            }
        }
    }
}

/// The exported node at `path`, `null` when absent.
pub(super) fn node_at(root: &Value, path: &[String]) -> Value {
    get_path(root, path).cloned().unwrap_or(Value::Null)
}
