//! The backing store contract consumed by the merge engine.
//!
//! A backing store exposes hierarchical locations through [`BackingRef`]. Each
//! location streams ordered child-level events and whole-subtree snapshots and
//! accepts writes. The merge engine only relies on this trait, so any store
//! that honours the delivery rules below can sit underneath a merged view.
//!
//! ## Delivery rules
//!
//! * Callbacks run from the store's own task loop. They are never invoked
//!   re-entrantly from inside `on`, `off` or a write call.
//! * Events of one listener are delivered in the order they were produced.
//! * A freshly registered `value` listener receives the current value; a
//!   freshly registered `child_added` listener receives one event per existing
//!   child, in order. For a location with both kinds of listener the initial
//!   `child_added` events of earlier registrations precede the initial `value`
//!   of later ones.
//! * After a listener is removed with `off` it receives nothing further, even
//!   for events that were already queued.
//!
//! [`MemoryStore`] is an in-process implementation of this contract.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::data::{DataSnapshot, with_priority};

mod errors;
pub mod memory;
mod query;

pub use errors::BackendError;
pub use memory::{MemoryRef, MemoryStore, SessionInfo};
pub use query::{QueryOp, QueryParams};

/// The events a location can be observed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Value,
    ChildAdded,
    ChildRemoved,
    ChildChanged,
    ChildMoved,
}

impl EventType {
    /// Every event type.
    pub const ALL: [EventType; 5] = [
        EventType::Value,
        EventType::ChildAdded,
        EventType::ChildRemoved,
        EventType::ChildChanged,
        EventType::ChildMoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildChanged => "child_changed",
            EventType::ChildMoved => "child_moved",
        }
    }

    /// Position of the event among the events raised by one change.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            EventType::ChildRemoved => 0,
            EventType::ChildAdded => 1,
            EventType::ChildMoved => 2,
            EventType::ChildChanged => 3,
            EventType::Value => 4,
        }
    }

    /// True for the four child-level events.
    pub fn is_child_event(&self) -> bool {
        !matches!(self, EventType::Value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| BackendError::InvalidData {
                reason: format!("unknown event type '{s}'"),
            })
    }
}

/// Identifies one registered listener of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives a snapshot and, for child events, the key of the preceding child.
pub type EventCallback = Arc<dyn Fn(&DataSnapshot, Option<&str>) + Send + Sync>;

/// Receives the reason a listener was cancelled by the store.
pub type CancelCallback = Arc<dyn Fn(&BackendError) + Send + Sync>;

/// Receives the outcome of one write.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), BackendError>) + Send>;

/// A location (optionally narrowed by a query) in a backing store.
pub trait BackingRef: Send + Sync + fmt::Debug {
    /// The last component of the location, `None` at the root.
    fn key(&self) -> Option<String>;

    /// Absolute address of the location. Queries share the address of the
    /// location they narrow.
    fn url(&self) -> String;

    /// A descendant location; `path` may contain `/`. Query parameters are not
    /// inherited.
    fn child(&self, path: &str) -> Arc<dyn BackingRef>;

    fn parent(&self) -> Option<Arc<dyn BackingRef>>;

    fn root(&self) -> Arc<dyn BackingRef>;

    /// A new handle on the same location with `op` applied.
    fn query(&self, op: QueryOp) -> Arc<dyn BackingRef>;

    /// Tells apart handles on the same location narrowed by different
    /// queries. Empty when no query applies.
    fn query_identifier(&self) -> String;

    /// Registers a listener.
    fn on(
        &self,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> ListenerId;

    /// Registers a listener that is removed after its first event.
    fn once(
        &self,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> ListenerId;

    /// Removes listeners of this location, narrowed by event and id.
    fn off(&self, event: Option<EventType>, listener: Option<ListenerId>);

    /// Replaces the value at the location. `null` deletes it.
    fn set(&self, value: Value, on_complete: Option<CompletionCallback>);

    /// Writes several children at once. Keys may be `/`-separated paths.
    fn update(&self, values: Map<String, Value>, on_complete: Option<CompletionCallback>);

    fn remove(&self, on_complete: Option<CompletionCallback>) {
        self.set(Value::Null, on_complete);
    }

    fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Option<CompletionCallback>,
    ) {
        self.set(with_priority(value, priority), on_complete);
    }

    fn set_priority(&self, priority: Value, on_complete: Option<CompletionCallback>);

    /// Creates a child with a generated, time-ordered key and optionally writes
    /// `value` there.
    fn push(&self, value: Option<Value>, on_complete: Option<CompletionCallback>)
    -> Arc<dyn BackingRef>;

    fn auth(&self, token: &str);

    fn unauth(&self);

    fn go_online(&self);

    fn go_offline(&self);
}

/// A listener registration that is removed when stopped or dropped.
#[derive(Debug)]
pub struct Subscription {
    reference: Arc<dyn BackingRef>,
    event: EventType,
    listener: Option<ListenerId>,
}

impl Subscription {
    /// Registers `callback` on `reference` and returns the owning handle.
    pub fn listen(
        reference: Arc<dyn BackingRef>,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> Self {
        let listener = reference.on(event, callback, cancel);
        Self {
            reference,
            event,
            listener: Some(listener),
        }
    }

    /// Like [`Subscription::listen`] for a listener that fires at most once.
    pub fn listen_once(
        reference: Arc<dyn BackingRef>,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> Self {
        let listener = reference.once(event, callback, cancel);
        Self {
            reference,
            event,
            listener: Some(listener),
        }
    }

    pub fn reference(&self) -> &Arc<dyn BackingRef> {
        &self.reference
    }

    pub fn event(&self) -> EventType {
        self.event
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Removes the listener. Stopping twice is a no-op.
    pub fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.reference.off(Some(self.event), Some(listener));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
