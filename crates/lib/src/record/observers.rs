//! Registry of merged listeners.
//!
//! Each event type of a node is either inactive or active with one event
//! manager and at least one observer. The first observer activates the event,
//! removing the last one deactivates it. Managers are started, stopped and
//! replayed by the caller after the registry lock is released.
//!
//! Nodes are looked up by address in the [`Registry`] of their collection, so
//! every handle on the same node sees the same listeners and a listener stays
//! registered until it is removed or cancelled. Entries exist only while at
//! least one event of the node is active.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::MergedSnapshot;
use crate::backend::{BackendError, EventType};
use crate::events::EventManager;

/// Identifies one merged listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Receives a merged snapshot and, for child events, the key of the preceding
/// child.
pub type MergedCallback = Arc<dyn Fn(&MergedSnapshot, Option<&str>) + Send + Sync>;

/// Receives the reason a merged listener was cancelled.
pub type MergedCancel = Arc<dyn Fn(&BackendError) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Observer {
    pub(crate) id: ObserverId,
    pub(crate) callback: MergedCallback,
    pub(crate) cancel: Option<MergedCancel>,
    /// Registered by another merged node rather than by a caller. Only
    /// removed by id or by cancellation.
    pub(crate) internal: bool,
}

impl Observer {
    pub(crate) fn notify(&self, snapshot: &MergedSnapshot, prev: Option<&str>) {
        (self.callback)(snapshot, prev);
    }
}

enum EventSlot {
    Inactive,
    Active {
        observers: Vec<Observer>,
        manager: Arc<dyn EventManager>,
    },
}

pub(crate) enum Attached {
    /// The observer is the first one; the manager must be started.
    Activated(Arc<dyn EventManager>),
    /// The manager is already running; the observer needs a replay.
    Joined(Arc<dyn EventManager>),
}

pub(crate) struct NodeShared {
    slots: Mutex<HashMap<EventType, EventSlot>>,
}

impl NodeShared {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn attach(
        &self,
        event: EventType,
        observer: Observer,
        create: impl FnOnce() -> Arc<dyn EventManager>,
    ) -> Attached {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(event).or_insert(EventSlot::Inactive);
        match slot {
            EventSlot::Active { observers, manager } => {
                observers.push(observer);
                Attached::Joined(Arc::clone(manager))
            }
            EventSlot::Inactive => {
                let manager = create();
                *slot = EventSlot::Active {
                    observers: vec![observer],
                    manager: Arc::clone(&manager),
                };
                Attached::Activated(manager)
            }
        }
    }

    /// Removes observers, narrowed by event and id. Returns the managers of
    /// the events that lost their last observer.
    pub(crate) fn detach(
        &self,
        event: Option<EventType>,
        id: Option<ObserverId>,
    ) -> Vec<Arc<dyn EventManager>> {
        let mut slots = self.slots.lock().unwrap();
        let mut deactivated = Vec::new();
        for (slot_event, slot) in slots.iter_mut() {
            if event.is_some_and(|event| event != *slot_event) {
                continue;
            }
            let EventSlot::Active { observers, .. } = slot else {
                continue;
            };
            match id {
                Some(id) => observers.retain(|observer| observer.id != id),
                None => observers.retain(|observer| observer.internal),
            }
            if observers.is_empty() {
                if let EventSlot::Active { manager, .. } =
                    std::mem::replace(slot, EventSlot::Inactive)
                {
                    deactivated.push(manager);
                }
            }
        }
        deactivated
    }

    pub(crate) fn observers(&self, event: EventType) -> Vec<Observer> {
        match self.slots.lock().unwrap().get(&event) {
            Some(EventSlot::Active { observers, .. }) => observers.clone(),
            _ => Vec::new(),
        }
    }

    /// Deactivates `event`, returning its observers and manager.
    pub(crate) fn cancel(
        &self,
        event: EventType,
    ) -> Option<(Vec<Observer>, Arc<dyn EventManager>)> {
        let mut slots = self.slots.lock().unwrap();
        match slots.insert(event, EventSlot::Inactive) {
            Some(EventSlot::Active { observers, manager }) => Some((observers, manager)),
            _ => None,
        }
    }

    pub(crate) fn observer_count(&self, event: EventType) -> usize {
        match self.slots.lock().unwrap().get(&event) {
            Some(EventSlot::Active { observers, .. }) => observers.len(),
            _ => 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.slots
            .lock()
            .unwrap()
            .values()
            .all(|slot| matches!(slot, EventSlot::Inactive))
    }
}

/// The listener tables of the active nodes of one collection, by address.
pub(crate) struct Registry {
    nodes: Mutex<HashMap<String, Arc<NodeShared>>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &self.len())
            .finish()
    }
}

impl Registry {
    pub(crate) fn next_id(&self) -> ObserverId {
        ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds `observer` to the node at `address`, creating the node's entry if
    /// needed. `create` builds the manager of a newly activated event.
    pub(crate) fn attach(
        &self,
        address: &str,
        event: EventType,
        observer: Observer,
        create: impl FnOnce(&Arc<NodeShared>) -> Arc<dyn EventManager>,
    ) -> Attached {
        let mut nodes = self.nodes.lock().unwrap();
        let shared = Arc::clone(
            nodes
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(NodeShared::new())),
        );
        shared.attach(event, observer, || create(&shared))
    }

    /// Removes observers of the node at `address`, narrowed by event and id.
    /// Returns the managers of the events that lost their last observer.
    pub(crate) fn detach(
        &self,
        address: &str,
        event: Option<EventType>,
        id: Option<ObserverId>,
    ) -> Vec<Arc<dyn EventManager>> {
        let mut nodes = self.nodes.lock().unwrap();
        let Some(shared) = nodes.get(address) else {
            return Vec::new();
        };
        let deactivated = shared.detach(event, id);
        if shared.is_idle() {
            nodes.remove(address);
        }
        deactivated
    }

    /// Deactivates `event` on `shared`, the table registered at `address`,
    /// returning its observers and manager.
    pub(crate) fn cancel(
        &self,
        address: &str,
        shared: &Arc<NodeShared>,
        event: EventType,
    ) -> Option<(Vec<Observer>, Arc<dyn EventManager>)> {
        let mut nodes = self.nodes.lock().unwrap();
        let cancelled = shared.cancel(event);
        let current = nodes
            .get(address)
            .is_some_and(|registered| Arc::ptr_eq(registered, shared));
        if current && shared.is_idle() {
            nodes.remove(address);
        }
        cancelled
    }

    pub(crate) fn observer_count(&self, address: &str, event: EventType) -> usize {
        self.nodes
            .lock()
            .unwrap()
            .get(address)
            .map_or(0, |shared| shared.observer_count(event))
    }

    /// Number of nodes with at least one active event.
    pub(crate) fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }
}
