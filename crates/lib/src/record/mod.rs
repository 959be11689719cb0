//! The merged node hierarchy.
//!
//! A merged view has three levels:
//!
//! * the **set** of records, keyed by master key ([`RecordKind::Set`])
//! * one **record**, joining one record of each path ([`RecordKind::Record`])
//! * one **field** of a record and any location below it
//!   ([`RecordKind::Field`])
//!
//! Each level implements [`RecordBehavior`], which says how the level reads
//! (children, merged value, priority) and how it splits writes into writes of
//! the underlying paths. [`RecordNode`] ties a level to its parent; its
//! listeners live in the [`Registry`] of the collection, under the node's
//! address.

mod errors;
mod field;
mod joined;
mod observers;
mod queue;
mod set;
mod snapshot;
mod write;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::debug;

pub use errors::RecordError;
pub use observers::{MergedCallback, MergedCancel, ObserverId};
pub use snapshot::{MergedSnapshot, RawSnapshot, RawSnapshots};
pub use write::{WriteCallback, WriteResult};

pub(crate) use field::{FieldTarget, RecordField};
pub(crate) use joined::Record;
pub(crate) use observers::{Attached, NodeShared, Observer, Registry};
pub(crate) use set::RecordSet;
pub(crate) use write::{PendingWrite, WriteMode, execute};

use crate::backend::{BackingRef, EventType, QueryOp};
use crate::collection::{FieldMap, Filter, MergeConfig, PathManager};
use crate::events::manager_for;

/// Everything a merged node needs to know about its collection.
#[derive(Debug, Clone)]
pub(crate) struct MergeContext {
    pub(crate) paths: Arc<PathManager>,
    pub(crate) fields: Arc<FieldMap>,
    pub(crate) filter: Arc<Filter>,
    pub(crate) config: Arc<MergeConfig>,
    pub(crate) listeners: Arc<Registry>,
}

impl MergeContext {
    pub(crate) fn new(
        paths: Arc<PathManager>,
        fields: Arc<FieldMap>,
        filter: Arc<Filter>,
        config: Arc<MergeConfig>,
    ) -> Self {
        Self {
            paths,
            fields,
            filter,
            config,
            listeners: Arc::new(Registry::default()),
        }
    }

    /// A copy whose master path reads through `reference`.
    pub(crate) fn with_master(&self, reference: Arc<dyn BackingRef>) -> Self {
        Self {
            paths: Arc::new(self.paths.with_master(reference)),
            ..self.clone()
        }
    }

    pub(crate) fn master_alias(&self) -> &str {
        self.paths.master().name()
    }
}

/// How one level of the hierarchy reads and writes.
pub(crate) trait RecordBehavior {
    fn has_child(&self, raw: &RawSnapshots, key: &str) -> bool;

    /// Calls `f` with each child key in order until it returns true. Returns
    /// true if iteration was stopped.
    fn for_each_key(&self, raw: &RawSnapshots, f: &mut dyn FnMut(&str) -> bool) -> bool;

    /// The raw snapshots of the child `key`.
    fn get_child_snaps(&self, raw: &RawSnapshots, key: &str) -> RawSnapshots;

    fn merge_data(&self, raw: &RawSnapshots, export: bool) -> Value;

    fn get_priority(&self, raw: &RawSnapshots) -> Value;

    fn make_child(&self, key: &str, node: &RecordNode) -> RecordKind;

    /// Splits a write of `value` into underlying writes.
    fn save_data(&self, value: Value, mode: WriteMode) -> Result<Vec<PendingWrite>, RecordError>;

    fn save_priority(&self, priority: Value) -> Result<Vec<PendingWrite>, RecordError>;

    fn key(&self) -> String;

    /// Human readable address.
    fn describe(&self) -> String;
}

pub(crate) enum RecordKind {
    Set(RecordSet),
    Record(Record),
    Field(RecordField),
}

impl RecordKind {
    fn behavior(&self) -> &dyn RecordBehavior {
        match self {
            RecordKind::Set(set) => set,
            RecordKind::Record(record) => record,
            RecordKind::Field(field) => field,
        }
    }
}

impl RecordBehavior for RecordKind {
    fn has_child(&self, raw: &RawSnapshots, key: &str) -> bool {
        self.behavior().has_child(raw, key)
    }

    fn for_each_key(&self, raw: &RawSnapshots, f: &mut dyn FnMut(&str) -> bool) -> bool {
        self.behavior().for_each_key(raw, f)
    }

    fn get_child_snaps(&self, raw: &RawSnapshots, key: &str) -> RawSnapshots {
        self.behavior().get_child_snaps(raw, key)
    }

    fn merge_data(&self, raw: &RawSnapshots, export: bool) -> Value {
        self.behavior().merge_data(raw, export)
    }

    fn get_priority(&self, raw: &RawSnapshots) -> Value {
        self.behavior().get_priority(raw)
    }

    fn make_child(&self, key: &str, node: &RecordNode) -> RecordKind {
        self.behavior().make_child(key, node)
    }

    fn save_data(&self, value: Value, mode: WriteMode) -> Result<Vec<PendingWrite>, RecordError> {
        self.behavior().save_data(value, mode)
    }

    fn save_priority(&self, priority: Value) -> Result<Vec<PendingWrite>, RecordError> {
        self.behavior().save_priority(priority)
    }

    fn key(&self) -> String {
        self.behavior().key()
    }

    fn describe(&self) -> String {
        self.behavior().describe()
    }
}

/// One node of a merged view.
///
/// Nodes are cheap to clone. Like references of a backing store, every node
/// with the same address shares the same listeners, and a listener stays
/// registered until it is removed or cancelled.
#[derive(Clone)]
pub(crate) struct RecordNode {
    kind: Arc<RecordKind>,
    parent: Option<Arc<RecordNode>>,
}

impl fmt::Debug for RecordNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl RecordNode {
    /// The set-level node of a collection.
    pub(crate) fn root(context: MergeContext) -> Self {
        Self::from_parts(RecordKind::Set(RecordSet::new(context)), None)
    }

    pub(crate) fn from_parts(kind: RecordKind, parent: Option<Arc<RecordNode>>) -> Self {
        Self {
            kind: Arc::new(kind),
            parent,
        }
    }

    pub(crate) fn kind(&self) -> &RecordKind {
        &self.kind
    }

    pub(crate) fn kind_arc(&self) -> &Arc<RecordKind> {
        &self.kind
    }

    pub(crate) fn describe(&self) -> String {
        self.kind.describe()
    }

    /// Identifies the node within its collection. A query is part of the
    /// address.
    pub(crate) fn address(&self) -> String {
        let (level, base, reference) = match &*self.kind {
            RecordKind::Set(set) => (
                "set",
                set.describe(),
                Some(set.context().paths.master().reference()),
            ),
            RecordKind::Record(record) => ("record", record.describe(), None),
            RecordKind::Field(field) => match field.target() {
                FieldTarget::Static(reference) => ("field", reference.url(), Some(reference)),
                FieldTarget::Dynamic { .. } => ("field", field.describe(), None),
            },
        };
        let query = reference
            .map(|reference| reference.query_identifier())
            .unwrap_or_default();
        if query.is_empty() {
            format!("{level}:{base}")
        } else {
            format!("{level}:{base}?{query}")
        }
    }

    pub(crate) fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.context().listeners)
    }

    pub(crate) fn is_set(&self) -> bool {
        matches!(*self.kind, RecordKind::Set(_))
    }

    pub(crate) fn child(&self, key: &str) -> RecordNode {
        let kind = self.kind.make_child(key, self);
        Self::from_parts(kind, Some(Arc::new(self.clone())))
    }

    pub(crate) fn parent(&self) -> Option<RecordNode> {
        self.parent.as_deref().cloned()
    }

    /// The set-level node this node descends from.
    pub(crate) fn root_node(&self) -> RecordNode {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// The collection this node belongs to.
    pub(crate) fn context(&self) -> MergeContext {
        match self.root_node().kind() {
            RecordKind::Set(set) => set.context().clone(),
            RecordKind::Record(record) => record.context().clone(),
            RecordKind::Field(field) => field.context().clone(),
        }
    }

    /// A node reading the same data through a query.
    pub(crate) fn query(&self, op: QueryOp) -> Result<RecordNode, RecordError> {
        match &*self.kind {
            RecordKind::Set(set) => {
                let context = set.context();
                let master = context.paths.master().reference().query(op);
                Ok(RecordNode::root(context.with_master(master)))
            }
            RecordKind::Field(field) => match field.target() {
                FieldTarget::Static(reference) => Ok(RecordNode::from_parts(
                    RecordKind::Field(field.retarget(reference.query(op))),
                    self.parent.clone(),
                )),
                FieldTarget::Dynamic { .. } => Err(RecordError::Unsupported {
                    operation: "query".to_string(),
                    hint: "query the path the field is joined from".to_string(),
                }),
            },
            RecordKind::Record(_) => Err(RecordError::Unsupported {
                operation: "query".to_string(),
                hint: "records have a fixed field order; query the collection or a field"
                    .to_string(),
            }),
        }
    }

    /// Registers a merged listener.
    pub(crate) fn on(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
    ) -> ObserverId {
        self.register(event, callback, cancel, false)
    }

    /// Registers a merged listener that is removed after its first event.
    pub(crate) fn once(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
    ) -> ObserverId {
        self.register_once(event, callback, cancel, false)
    }

    /// Like [`RecordNode::on`] for listeners other merged nodes depend on.
    /// They are only removed by id.
    pub(crate) fn track(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
    ) -> ObserverId {
        self.register(event, callback, cancel, true)
    }

    pub(crate) fn track_once(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
    ) -> ObserverId {
        self.register_once(event, callback, cancel, true)
    }

    fn register(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
        internal: bool,
    ) -> ObserverId {
        let registry = self.registry();
        let address = self.address();
        let id = registry.next_id();
        let observer = Observer {
            id,
            callback,
            cancel,
            internal,
        };
        match registry.attach(&address, event, observer.clone(), |shared| {
            manager_for(self, event, shared)
        }) {
            Attached::Activated(manager) => {
                debug!(node = %address, %event, "merged event activated");
                manager.start();
            }
            Attached::Joined(manager) => manager.replay(&observer),
        }
        id
    }

    fn register_once(
        &self,
        event: EventType,
        callback: MergedCallback,
        cancel: Option<MergedCancel>,
        internal: bool,
    ) -> ObserverId {
        let fired = Arc::new(AtomicBool::new(false));
        let registered: Arc<OnceLock<ObserverId>> = Arc::new(OnceLock::new());
        let pending: Arc<OnceLock<()>> = Arc::new(OnceLock::new());
        let node = self.clone();
        let wrapped: MergedCallback = {
            let registered = Arc::clone(&registered);
            let pending = Arc::clone(&pending);
            Arc::new(move |snapshot: &MergedSnapshot, prev: Option<&str>| {
                if fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                callback(snapshot, prev);
                match registered.get() {
                    Some(id) => node.off(Some(event), Some(*id)),
                    None => {
                        let _ = pending.set(());
                    }
                }
            })
        };
        let id = self.register(event, wrapped, cancel, internal);
        let _ = registered.set(id);
        if pending.get().is_some() {
            self.off(Some(event), Some(id));
        }
        id
    }

    /// Removes merged listeners, narrowed by event and id.
    pub(crate) fn off(&self, event: Option<EventType>, id: Option<ObserverId>) {
        for manager in self.registry().detach(&self.address(), event, id) {
            debug!(node = %self.describe(), "merged event deactivated");
            manager.stop();
        }
    }

    pub(crate) fn observer_count(&self, event: EventType) -> usize {
        self.registry().observer_count(&self.address(), event)
    }

    /// Splits `value` into underlying writes and issues them.
    pub(crate) fn save(
        &self,
        value: Value,
        mode: WriteMode,
        on_complete: Option<WriteCallback>,
    ) -> Result<(), RecordError> {
        let writes = self.kind.save_data(value, mode)?;
        debug!(node = %self.describe(), writes = writes.len(), ?mode, "merged write");
        execute(writes, on_complete);
        Ok(())
    }

    pub(crate) fn save_priority(
        &self,
        priority: Value,
        on_complete: Option<WriteCallback>,
    ) -> Result<(), RecordError> {
        let writes = self.kind.save_priority(priority)?;
        execute(writes, on_complete);
        Ok(())
    }
}
