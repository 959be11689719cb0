//! Underlying writes produced by a merged write.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use super::queue::{Slot, WriteQueue};
use crate::Error;
use crate::backend::{BackendError, BackingRef, CompletionCallback};

/// Outcome of a merged write: success, or every error reported by the
/// underlying writes.
pub type WriteResult = std::result::Result<(), Vec<Error>>;

/// Receives the outcome of a merged write exactly once.
pub type WriteCallback = Box<dyn FnOnce(WriteResult) + Send>;

pub(crate) type DeferredDone = Box<dyn FnOnce(WriteResult) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Replace: declared fields missing from the payload are cleared.
    Set,
    /// Merge: only the given fields are touched.
    Update,
}

/// One write against a backing location.
pub(crate) enum PendingWrite {
    Set {
        reference: Arc<dyn BackingRef>,
        value: Value,
    },
    Update {
        reference: Arc<dyn BackingRef>,
        values: Map<String, Value>,
    },
    SetPriority {
        reference: Arc<dyn BackingRef>,
        priority: Value,
    },
    /// A write whose target is only known after reading current data.
    Deferred {
        label: String,
        start: Box<dyn FnOnce(DeferredDone) + Send>,
    },
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingWrite::Set { reference, value } => f
                .debug_struct("Set")
                .field("target", &reference.url())
                .field("value", value)
                .finish(),
            PendingWrite::Update { reference, values } => f
                .debug_struct("Update")
                .field("target", &reference.url())
                .field("values", values)
                .finish(),
            PendingWrite::SetPriority {
                reference,
                priority,
            } => f
                .debug_struct("SetPriority")
                .field("target", &reference.url())
                .field("priority", priority)
                .finish(),
            PendingWrite::Deferred { label, .. } => {
                f.debug_struct("Deferred").field("label", label).finish()
            }
        }
    }
}

fn backend_completion(slot: Slot) -> CompletionCallback {
    Box::new(move |result: Result<(), BackendError>| {
        slot.complete(result.map_err(|err| vec![err.into()]))
    })
}

impl PendingWrite {
    pub(crate) fn target(&self) -> String {
        match self {
            PendingWrite::Set { reference, .. }
            | PendingWrite::Update { reference, .. }
            | PendingWrite::SetPriority { reference, .. } => reference.url(),
            PendingWrite::Deferred { label, .. } => label.clone(),
        }
    }

    fn issue(self, slot: Slot) {
        trace!(write = ?self, "issuing write");
        match self {
            PendingWrite::Set { reference, value } => {
                reference.set(value, Some(backend_completion(slot)))
            }
            PendingWrite::Update { reference, values } => {
                reference.update(values, Some(backend_completion(slot)))
            }
            PendingWrite::SetPriority {
                reference,
                priority,
            } => reference.set_priority(priority, Some(backend_completion(slot))),
            PendingWrite::Deferred { start, .. } => {
                start(Box::new(move |result| slot.complete(result)))
            }
        }
    }
}

/// Issues `writes` and reports their combined outcome to `on_complete`.
///
/// Every write is registered before the first one is issued, so the outcome
/// is reported exactly once even if writes complete synchronously.
pub(crate) fn execute(writes: Vec<PendingWrite>, on_complete: Option<WriteCallback>) {
    let queue = WriteQueue::new(on_complete.unwrap_or_else(|| Box::new(|_| {})));
    let slots: Vec<Slot> = writes
        .iter()
        .map(|write| queue.slot(write.target()))
        .collect();
    queue.arm();
    for (write, slot) in writes.into_iter().zip(slots) {
        write.issue(slot);
    }
}
