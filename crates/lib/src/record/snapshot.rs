//! Merged snapshots.

use std::fmt;

use serde_json::Value;

use super::{RecordBehavior, RecordNode};
use crate::data::{DataSnapshot, split_path};
use crate::reference::MergedRef;

/// The snapshot one path contributed to a merged snapshot.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    /// Alias of the path.
    pub path: String,
    pub snapshot: DataSnapshot,
}

/// The per-path snapshots behind a merged snapshot, in path order. Paths whose
/// record could not be resolved are absent.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshots(Vec<RawSnapshot>);

impl RawSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: &str, snapshot: DataSnapshot) -> Self {
        let mut raw = Self::new();
        raw.push(path, snapshot);
        raw
    }

    pub fn push(&mut self, path: &str, snapshot: DataSnapshot) {
        self.0.push(RawSnapshot {
            path: path.to_string(),
            snapshot,
        });
    }

    /// The snapshot of the path aliased `path`.
    pub fn get(&self, path: &str) -> Option<&DataSnapshot> {
        self.0
            .iter()
            .find(|raw| raw.path == path)
            .map(|raw| &raw.snapshot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawSnapshot> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An immutable view of a merged node: the merged set, one record, or a field
/// (or a descendant of one).
///
/// Values are computed from the raw path snapshots on demand.
#[derive(Clone)]
pub struct MergedSnapshot {
    node: RecordNode,
    raw: RawSnapshots,
}

impl fmt::Debug for MergedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedSnapshot")
            .field("node", &self.node.describe())
            .field("raw", &self.raw)
            .finish()
    }
}

impl MergedSnapshot {
    pub(crate) fn new(node: RecordNode, raw: RawSnapshots) -> Self {
        Self { node, raw }
    }

    pub fn key(&self) -> String {
        self.node.kind().key()
    }

    /// The merged value, priorities removed. `Null` when nothing exists.
    pub fn val(&self) -> Value {
        self.node.kind().merge_data(&self.raw, false)
    }

    /// The merged value in export form.
    pub fn export_val(&self) -> Value {
        self.node.kind().merge_data(&self.raw, true)
    }

    pub fn exists(&self) -> bool {
        !self.val().is_null()
    }

    pub fn priority(&self) -> Value {
        self.node.kind().get_priority(&self.raw)
    }

    /// Snapshot of a descendant; `path` may contain `/`.
    pub fn child(&self, path: &str) -> MergedSnapshot {
        let mut current = self.clone();
        for key in split_path(path) {
            let raw = current.node.kind().get_child_snaps(&current.raw, &key);
            current = MergedSnapshot::new(current.node.child(&key), raw);
        }
        current
    }

    pub fn has_child(&self, path: &str) -> bool {
        match path.split_once('/') {
            None => self.node.kind().has_child(&self.raw, path),
            Some(_) => self.child(path).exists(),
        }
    }

    pub fn has_children(&self) -> bool {
        self.num_children() > 0
    }

    pub fn num_children(&self) -> usize {
        let mut count = 0;
        self.node.kind().for_each_key(&self.raw, &mut |_| {
            count += 1;
            false
        });
        count
    }

    /// Calls `f` for each child in order. Returns true if `f` stopped the
    /// iteration by returning true.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(MergedSnapshot) -> bool,
    {
        self.node
            .kind()
            .for_each_key(&self.raw, &mut |key| f(self.child(key)))
    }

    /// The keys of the children in iteration order.
    pub fn child_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.node.kind().for_each_key(&self.raw, &mut |key| {
            keys.push(key.to_string());
            false
        });
        keys
    }

    /// The merged location this snapshot was taken at.
    pub fn reference(&self) -> MergedRef {
        MergedRef::from_node(self.node.clone())
    }

    /// The per-path snapshots this snapshot merges.
    pub fn raw(&self) -> &RawSnapshots {
        &self.raw
    }

    pub(crate) fn node(&self) -> &RecordNode {
        &self.node
    }
}
