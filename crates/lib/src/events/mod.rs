//! Event synthesis for merged nodes.
//!
//! Every active (node, event type) pair owns one [`EventManager`]. The manager
//! subscribes to whatever backing data it needs, computes merged snapshots and
//! hands them to an [`Emitter`], which fans them out to the node's observers.
//!
//! * [`set_manager`] tracks master keys and per-record values to produce the
//!   set's events, including filter promotion and demotion.
//! * [`record_manager`] joins one record of each path, re-resolving dynamic
//!   dependencies whenever the key they are read from changes.
//! * [`field_manager`] forwards a field's backing events.

mod field_manager;
mod record_manager;
mod set_manager;

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::backend::{BackendError, EventType};
use crate::record::{MergedSnapshot, NodeShared, Observer, RecordKind, RecordNode};

use field_manager::FieldManager;
use record_manager::RecordManager;
use set_manager::SetManager;

/// Produces the events of one (node, event type) pair.
///
/// `start` and `stop` bracket the active period; `replay` brings a late
/// observer up to date with the events it missed.
pub(crate) trait EventManager: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn replay(&self, observer: &Observer);
}

/// Creates the manager for `event` on `node`, whose listeners live in
/// `shared`.
pub(crate) fn manager_for(
    node: &RecordNode,
    event: EventType,
    shared: &Arc<NodeShared>,
) -> Arc<dyn EventManager> {
    let emitter = Emitter::new(node, event, shared);
    match node.kind() {
        RecordKind::Set(set) => Arc::new(SetManager::new(set.context().clone(), emitter)),
        RecordKind::Record(record) => Arc::new(RecordManager::new(
            record.context().clone(),
            record.id(),
            emitter,
        )),
        RecordKind::Field(field) => Arc::new(FieldManager::new(field, emitter)),
    }
}

/// Delivers a manager's events to the observers of its node.
///
/// Holds the node's listener table weakly: once the table leaves the
/// registry, nothing is delivered.
#[derive(Clone)]
pub(crate) struct Emitter {
    event: EventType,
    node: RecordNode,
    address: String,
    shared: Weak<NodeShared>,
}

impl Emitter {
    fn new(node: &RecordNode, event: EventType, shared: &Arc<NodeShared>) -> Self {
        Self {
            event,
            node: node.clone(),
            address: node.address(),
            shared: Arc::downgrade(shared),
        }
    }

    pub(crate) fn event(&self) -> EventType {
        self.event
    }

    /// The node this emitter delivers to.
    pub(crate) fn node(&self) -> &RecordNode {
        &self.node
    }

    pub(crate) fn emit(&self, snapshot: &MergedSnapshot, prev: Option<&str>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        for observer in shared.observers(self.event) {
            observer.notify(snapshot, prev);
        }
    }

    /// Deactivates the event and passes `err` to every observer's cancel
    /// callback.
    pub(crate) fn cancel(&self, err: &BackendError) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let registry = self.node.registry();
        let Some((observers, manager)) = registry.cancel(&self.address, &shared, self.event) else {
            return;
        };
        debug!(
            node = %self.address,
            event = %self.event,
            error = %err,
            "merged event cancelled"
        );
        manager.stop();
        for observer in observers {
            if let Some(cancel) = &observer.cancel {
                cancel(err);
            }
        }
    }
}
