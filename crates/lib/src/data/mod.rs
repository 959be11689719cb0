//! Data handling shared by the backing store and the merge engine.
//!
//! Values are plain [`serde_json::Value`]s. Nodes are stored and exchanged in the
//! *export* form of the backing store:
//!
//! * an object node may carry its priority under the `.priority` key;
//! * a primitive that carries a priority is wrapped as
//!   `{".value": <primitive>, ".priority": <priority>}`.
//!
//! [`strip_export`] turns the export form into the plain value callers see.
//!
//! ```
//! use mergeview::data::{strip_export, priority_of};
//! use serde_json::json;
//!
//! let node = json!({"name": "widget", ".priority": 3});
//! assert_eq!(strip_export(&node), json!({"name": "widget"}));
//! assert_eq!(priority_of(&node), json!(3));
//!
//! let wrapped = json!({".value": 7, ".priority": "a"});
//! assert_eq!(strip_export(&wrapped), json!(7));
//! ```

pub mod diff;
pub mod ordering;
mod snapshot;

pub use diff::{ChildChange, diff_children};
pub use ordering::Index;
pub use snapshot::{ChildOrder, DataSnapshot};

use serde_json::{Map, Value};

use crate::constants::{PRIORITY_KEY, VALUE_KEY};

/// Returns true if `key` is one of the export metadata keys.
pub fn is_meta_key(key: &str) -> bool {
    key == PRIORITY_KEY || key == VALUE_KEY
}

/// Returns true if the exported node can hold children.
pub fn is_container(node: &Value) -> bool {
    match node {
        Value::Object(map) => !map.contains_key(VALUE_KEY),
        _ => false,
    }
}

/// Removes export metadata, returning the plain value of a node.
///
/// Empty objects collapse to `null`, as the backing store never holds them.
pub fn strip_export(node: &Value) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(inner) = map.get(VALUE_KEY) {
                return strip_export(inner);
            }
            let mut out = Map::new();
            for (key, child) in map {
                if is_meta_key(key) {
                    continue;
                }
                let child = strip_export(child);
                if !child.is_null() {
                    out.insert(key.clone(), child);
                }
            }
            if out.is_empty() {
                Value::Null
            } else {
                Value::Object(out)
            }
        }
        Value::Array(items) => strip_export(&array_to_object(items)),
        other => other.clone(),
    }
}

/// Returns the priority of an exported node, or `null`.
pub fn priority_of(node: &Value) -> Value {
    node.as_object()
        .and_then(|map| map.get(PRIORITY_KEY))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Returns true if `priority` is an acceptable priority value.
pub fn is_valid_priority(priority: &Value) -> bool {
    matches!(priority, Value::Null | Value::Number(_) | Value::String(_))
}

/// Attaches (or clears, for `null`) a priority on a value in export form.
pub fn with_priority(value: Value, priority: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Object(mut map) if !map.contains_key(VALUE_KEY) => {
            if priority.is_null() {
                map.remove(PRIORITY_KEY);
            } else {
                map.insert(PRIORITY_KEY.to_string(), priority);
            }
            Value::Object(map)
        }
        Value::Object(map) => {
            let inner = map.get(VALUE_KEY).cloned().unwrap_or(Value::Null);
            with_priority(inner, priority)
        }
        primitive if priority.is_null() => primitive,
        primitive => {
            let mut map = Map::new();
            map.insert(VALUE_KEY.to_string(), primitive);
            map.insert(PRIORITY_KEY.to_string(), priority);
            Value::Object(map)
        }
    }
}

/// Splits a value in export form into the bare value and its priority.
pub fn split_export(value: Value) -> (Value, Value) {
    match value {
        Value::Object(mut map) => {
            let priority = map.remove(PRIORITY_KEY).unwrap_or(Value::Null);
            match map.remove(VALUE_KEY) {
                Some(inner) => (inner, priority),
                None => (Value::Object(map), priority),
            }
        }
        other => (other, Value::Null),
    }
}

/// Reads a value as a child key, for dependency resolution.
///
/// Strings are used verbatim, numbers through their decimal form. Anything
/// else (including `null`) has no key.
pub fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Splits a `/`-separated location into its non-empty components.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|component| !component.is_empty())
        .map(str::to_string)
        .collect()
}

/// Looks up a descendant of an exported node.
pub fn get_path<'a>(node: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = node;
    for component in path {
        if !is_container(current) || is_meta_key(component) {
            return None;
        }
        current = current.as_object()?.get(component)?;
    }
    Some(current)
}

/// Returns the child entries of an exported node, metadata excluded.
pub fn children_of(node: &Value) -> Vec<(String, Value)> {
    match node {
        Value::Object(map) if is_container(node) => map
            .iter()
            .filter(|(key, child)| !is_meta_key(key) && !child.is_null())
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Brings a written value into canonical export form.
///
/// Nulls are dropped, arrays become index-keyed objects, empty containers
/// collapse to `null` and a `.value` wrapper without priority is unwrapped.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(items) => normalize(array_to_object(&items)),
        Value::Object(map) => {
            if let Some(inner) = map.get(VALUE_KEY) {
                let inner = normalize(inner.clone());
                let priority = map.get(PRIORITY_KEY).cloned().unwrap_or(Value::Null);
                return with_priority(inner, priority);
            }
            let mut out = Map::new();
            let mut priority = Value::Null;
            for (key, child) in map {
                if key == PRIORITY_KEY {
                    priority = child;
                    continue;
                }
                let child = normalize(child);
                if !child.is_null() {
                    out.insert(key, child);
                }
            }
            if out.is_empty() {
                Value::Null
            } else {
                with_priority(Value::Object(out), priority)
            }
        }
        other => other,
    }
}

fn array_to_object(items: &[Value]) -> Value {
    let map = items
        .iter()
        .enumerate()
        .map(|(i, item)| (i.to_string(), item.clone()))
        .collect::<Map<_, _>>();
    Value::Object(map)
}
