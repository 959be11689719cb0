//! Events of one merged record.
//!
//! Every path of the collection gets a slot. Static slots listen to
//! `path/<record id>` for the whole active period. A dynamic slot's key is
//! read from the snapshot of the slot it depends on; when that key changes the
//! slot drops its listener and subscribes to the new location. Stale
//! callbacks are recognized by a per-slot generation counter.
//!
//! Nothing is emitted until every slot has loaded.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, trace};

use super::{Emitter, EventManager};
use crate::backend::{
    BackendError, BackingRef, CancelCallback, EventCallback, EventType, Subscription,
};
use crate::collection::Dependency;
use crate::data::{DataSnapshot, Index, diff_children};
use crate::record::{MergeContext, MergedSnapshot, Observer, RawSnapshots};

struct PathSlot {
    alias: String,
    /// `None` for static paths.
    dependency: Option<Dependency>,
    /// The record key on this path; `None` when the record is absent.
    key: Option<String>,
    resolved: bool,
    generation: u64,
    subscription: Option<Subscription>,
    snapshot: Option<DataSnapshot>,
    loaded: bool,
}

#[derive(Default)]
struct RecordState {
    active: bool,
    slots: Vec<PathSlot>,
    last: Option<MergedSnapshot>,
    last_value: Option<Value>,
    /// `(alias, exported value)` of each present field, in field order.
    last_children: Vec<(String, Value)>,
}

/// A listener to open: slot index, slot generation, location.
type Open = (usize, u64, Arc<dyn BackingRef>);

struct RecordCore {
    context: MergeContext,
    key: String,
    emitter: Emitter,
    state: Mutex<RecordState>,
}

pub(crate) struct RecordManager {
    core: Arc<RecordCore>,
}

impl RecordManager {
    pub(crate) fn new(context: MergeContext, key: &str, emitter: Emitter) -> Self {
        Self {
            core: Arc::new(RecordCore {
                context,
                key: key.to_string(),
                emitter,
                state: Mutex::new(RecordState::default()),
            }),
        }
    }
}

fn children_of(snapshot: &MergedSnapshot) -> Vec<(String, Value)> {
    let mut children = Vec::new();
    snapshot.for_each(|child| {
        children.push((child.key(), child.export_val()));
        false
    });
    children
}

impl EventManager for RecordManager {
    fn start(&self) {
        let opens = {
            let mut state = self.core.state.lock().unwrap();
            state.active = true;
            state.slots = self.core.initial_slots();
            state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.dependency.is_none())
                .filter_map(|(index, slot)| {
                    let path = self.core.context.paths.resolve(&slot.alias)?;
                    Some((index, slot.generation, path.child(&self.core.key)))
                })
                .collect::<Vec<Open>>()
        };
        self.core.open(opens);
    }

    fn stop(&self) {
        let state = std::mem::take(&mut *self.core.state.lock().unwrap());
        drop(state);
    }

    fn replay(&self, observer: &Observer) {
        let replayed: Vec<(MergedSnapshot, Option<String>)> = {
            let state = self.core.state.lock().unwrap();
            let Some(last) = state.last.clone() else {
                return;
            };
            match self.core.emitter.event() {
                EventType::Value => vec![(last, None)],
                EventType::ChildAdded => state
                    .last_children
                    .iter()
                    .enumerate()
                    .map(|(index, (key, _))| {
                        let prev = index
                            .checked_sub(1)
                            .map(|prev| state.last_children[prev].0.clone());
                        (last.child(key), prev)
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };
        for (snapshot, prev) in replayed {
            observer.notify(&snapshot, prev.as_deref());
        }
    }
}

impl RecordCore {
    fn initial_slots(&self) -> Vec<PathSlot> {
        self.context
            .paths
            .paths()
            .iter()
            .map(|path| {
                let is_static = self.context.paths.is_static(path.name());
                PathSlot {
                    alias: path.name().to_string(),
                    dependency: if is_static {
                        None
                    } else {
                        self.context.paths.dependency_of(path.name()).cloned()
                    },
                    key: is_static.then(|| self.key.clone()),
                    resolved: is_static,
                    generation: 0,
                    subscription: None,
                    snapshot: None,
                    loaded: false,
                }
            })
            .collect()
    }

    fn open(self: &Arc<Self>, opens: Vec<Open>) {
        for (index, generation, reference) in opens {
            let callback: EventCallback = {
                let weak = Arc::downgrade(self);
                Arc::new(move |snapshot: &DataSnapshot, _: Option<&str>| {
                    if let Some(core) = weak.upgrade() {
                        core.path_value(index, generation, snapshot.clone());
                    }
                })
            };
            let cancel: CancelCallback = {
                let weak = Arc::downgrade(self);
                Arc::new(move |err: &BackendError| {
                    if let Some(core) = weak.upgrade() {
                        core.emitter.cancel(err);
                    }
                })
            };
            let subscription =
                Subscription::listen(reference, EventType::Value, callback, Some(cancel));
            let stale = {
                let mut state = self.state.lock().unwrap();
                let current = state.active
                    && state
                        .slots
                        .get(index)
                        .is_some_and(|slot| slot.generation == generation);
                if current {
                    state.slots[index].subscription = Some(subscription);
                    None
                } else {
                    Some(subscription)
                }
            };
            drop(stale);
        }
    }

    fn path_value(self: &Arc<Self>, index: usize, generation: u64, snapshot: DataSnapshot) {
        let mut emissions = Vec::new();
        let (opens, closed) = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            let Some(slot) = state.slots.get_mut(index) else {
                return;
            };
            if slot.generation != generation {
                trace!(record = %self.key, path = %slot.alias, "dropping stale value");
                return;
            }
            slot.snapshot = Some(snapshot);
            slot.loaded = true;
            let changes = self.resolve(&mut state);
            self.evaluate(&mut state, &mut emissions);
            changes
        };
        drop(closed);
        self.open(opens);
        for (snapshot, prev) in emissions {
            self.emitter.emit(&snapshot, prev.as_deref());
        }
    }

    /// Re-resolves dynamic slots whose dependency has loaded. Returns the
    /// listeners to open and the ones to drop.
    fn resolve(&self, state: &mut RecordState) -> (Vec<Open>, Vec<Subscription>) {
        let mut opens = Vec::new();
        let mut closed = Vec::new();
        loop {
            let mut changed = false;
            for index in 0..state.slots.len() {
                let Some(dependency) = state.slots[index].dependency.clone() else {
                    continue;
                };
                let Some(parent) = state
                    .slots
                    .iter()
                    .find(|slot| slot.alias == dependency.path)
                else {
                    continue;
                };
                if !parent.loaded {
                    continue;
                }
                let desired = parent
                    .snapshot
                    .as_ref()
                    .and_then(|snapshot| dependency.resolve_key(snapshot));

                let slot = &mut state.slots[index];
                if slot.resolved && slot.key == desired {
                    continue;
                }
                debug!(
                    record = %self.key,
                    path = %slot.alias,
                    from = ?slot.key,
                    to = ?desired,
                    "dependent key changed"
                );
                slot.generation += 1;
                slot.resolved = true;
                slot.snapshot = None;
                closed.extend(slot.subscription.take());
                match (&desired, self.context.paths.resolve(&slot.alias)) {
                    (Some(key), Some(path)) => {
                        slot.loaded = false;
                        opens.push((index, slot.generation, path.child(key)));
                    }
                    _ => slot.loaded = true,
                }
                slot.key = desired;
                changed = true;
            }
            if !changed {
                break;
            }
        }
        (opens, closed)
    }

    fn evaluate(
        &self,
        state: &mut RecordState,
        emissions: &mut Vec<(MergedSnapshot, Option<String>)>,
    ) {
        if !state.slots.iter().all(|slot| slot.loaded) {
            return;
        }
        let node = self.emitter.node().clone();
        let mut raw = RawSnapshots::new();
        for slot in &state.slots {
            if let Some(snapshot) = &slot.snapshot {
                raw.push(&slot.alias, snapshot.clone());
            }
        }
        let merged = MergedSnapshot::new(node, raw);

        match self.emitter.event() {
            EventType::Value => {
                let exported = merged.export_val();
                let duplicate = state.last.is_some()
                    && state.last_value.as_ref() == Some(&exported);
                state.last = Some(merged.clone());
                if duplicate && self.context.config.suppress_duplicate_values {
                    return;
                }
                state.last_value = Some(exported);
                emissions.push((merged, None));
            }
            event => {
                let children = children_of(&merged);
                for change in diff_children(&state.last_children, &children, &Index::Key) {
                    if change.event != event {
                        continue;
                    }
                    let snapshot = if event == EventType::ChildRemoved {
                        state.last.as_ref().map(|last| last.child(&change.key))
                    } else {
                        Some(merged.child(&change.key))
                    };
                    if let Some(snapshot) = snapshot {
                        emissions.push((snapshot, change.prev));
                    }
                }
                state.last_children = children;
                state.last = Some(merged);
            }
        }
    }
}
