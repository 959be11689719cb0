//! Child-level change detection between two ordered views of a node.

use std::collections::HashMap;

use serde_json::Value;

use super::ordering::Index;
use crate::backend::EventType;

/// One child-level change between two views.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildChange {
    /// `ChildAdded`, `ChildRemoved`, `ChildMoved` or `ChildChanged`.
    pub event: EventType,
    pub key: String,
    /// The child's exported node (the old node for removals).
    pub node: Value,
    /// The key preceding the child in the new view.
    pub prev: Option<String>,
}

/// Diffs two ordered child lists.
///
/// Changes are returned removals first, then additions, moves and changes,
/// which is the order listeners observe them in. A child only counts as moved
/// when its sort value under `index` changed and its predecessor among the
/// surviving children differs.
pub fn diff_children(
    old: &[(String, Value)],
    new: &[(String, Value)],
    index: &Index,
) -> Vec<ChildChange> {
    let old_nodes: HashMap<&str, &Value> = old.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_nodes: HashMap<&str, &Value> = new.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_prev: HashMap<&str, Option<&str>> = new
        .iter()
        .enumerate()
        .map(|(i, (k, _))| (k.as_str(), i.checked_sub(1).map(|p| new[p].0.as_str())))
        .collect();

    let mut removed = Vec::new();
    let mut added = Vec::new();
    let mut moved = Vec::new();
    let mut changed = Vec::new();

    for (key, node) in old {
        if !new_nodes.contains_key(key.as_str()) {
            removed.push(ChildChange {
                event: EventType::ChildRemoved,
                key: key.clone(),
                node: node.clone(),
                prev: None,
            });
        }
    }

    let old_common: Vec<&str> = old
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| new_nodes.contains_key(k))
        .collect();
    let new_common: Vec<&str> = new
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| old_nodes.contains_key(k))
        .collect();
    let common_prev = |list: &[&str], key: &str| -> Option<String> {
        let pos = list.iter().position(|k| *k == key)?;
        pos.checked_sub(1).map(|p| list[p].to_string())
    };

    for (key, node) in new {
        let prev = new_prev
            .get(key.as_str())
            .copied()
            .flatten()
            .map(str::to_string);
        match old_nodes.get(key.as_str()) {
            None => added.push(ChildChange {
                event: EventType::ChildAdded,
                key: key.clone(),
                node: node.clone(),
                prev,
            }),
            Some(old_node) => {
                let sort_changed = index.sort_value(key, old_node) != index.sort_value(key, node);
                if sort_changed
                    && common_prev(&old_common, key) != common_prev(&new_common, key)
                {
                    moved.push(ChildChange {
                        event: EventType::ChildMoved,
                        key: key.clone(),
                        node: node.clone(),
                        prev: prev.clone(),
                    });
                }
                if *old_node != node {
                    changed.push(ChildChange {
                        event: EventType::ChildChanged,
                        key: key.clone(),
                        node: node.clone(),
                        prev,
                    });
                }
            }
        }
    }

    removed.extend(added);
    removed.extend(moved);
    removed.extend(changed);
    removed
}
