//! Events of the merged set.
//!
//! The manager follows the master path's children and subscribes to the
//! merged value of every record it sees. Each record is in exactly one state:
//!
//! * `loading`: no merged value has arrived yet
//! * `recs`: the record exists and passes the filter, so it is visible
//! * `filtered`: the record is absent or rejected by the filter
//!
//! Child events are synthesized from the transitions between these states.
//! The set's `value` event fires only once the initial enumeration of the
//! master path has resolved, then after every change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{Emitter, EventManager};
use crate::backend::{BackendError, CancelCallback, EventCallback, EventType, Subscription};
use crate::data::{ChildOrder, DataSnapshot};
use crate::record::{
    MergeContext, MergedCallback, MergedCancel, MergedSnapshot, Observer, ObserverId,
    RawSnapshots, RecordNode,
};

struct Tracked {
    node: RecordNode,
    /// `None` until the record listener is registered.
    observer: Option<ObserverId>,
    /// The last merged value received for the record.
    snapshot: Option<MergedSnapshot>,
}

impl Tracked {
    fn release(self) {
        if let Some(observer) = self.observer {
            self.node.off(Some(EventType::Value), Some(observer));
        }
    }
}

#[derive(Default)]
struct SetState {
    active: bool,
    /// Every known record id, in master order.
    order: Vec<String>,
    /// Visible record ids, in master order.
    visible: Vec<String>,
    loading: HashMap<String, Tracked>,
    recs: HashMap<String, Tracked>,
    filtered: HashMap<String, Tracked>,
    /// Ids of the initial enumeration that are still loading; `None` until
    /// the master path reported its first value.
    waiting: Option<HashSet<String>>,
    subscriptions: Vec<Subscription>,
    last_value: Option<Value>,
}

impl SetState {
    fn is_tracked(&self, id: &str) -> bool {
        self.loading.contains_key(id)
            || self.recs.contains_key(id)
            || self.filtered.contains_key(id)
    }

    fn tracked_mut(&mut self, id: &str) -> Option<&mut Tracked> {
        if self.loading.contains_key(id) {
            self.loading.get_mut(id)
        } else if self.recs.contains_key(id) {
            self.recs.get_mut(id)
        } else {
            self.filtered.get_mut(id)
        }
    }

    fn is_complete(&self) -> bool {
        self.waiting.as_ref().is_some_and(HashSet::is_empty)
    }

    fn prev_visible(&self, id: &str) -> Option<String> {
        let index = self.visible.iter().position(|key| key == id)?;
        index.checked_sub(1).map(|prev| self.visible[prev].clone())
    }

    /// Places `id` in `order` right after `prev`, or first without one.
    fn place(&mut self, id: &str, prev: Option<&str>) {
        self.order.retain(|key| key != id);
        let index = match prev {
            None => 0,
            Some(prev) => self
                .order
                .iter()
                .position(|key| key == prev)
                .map_or(self.order.len(), |index| index + 1),
        };
        self.order.insert(index, id.to_string());
    }

    /// Inserts `id` among the visible ids after its nearest visible
    /// predecessor in master order.
    fn show(&mut self, id: &str) {
        self.visible.retain(|key| key != id);
        let predecessor = self
            .order
            .iter()
            .position(|key| key == id)
            .and_then(|index| {
                self.order[..index]
                    .iter()
                    .rev()
                    .find(|key| self.visible.contains(*key))
            });
        let index = match predecessor {
            Some(predecessor) => {
                self.visible
                    .iter()
                    .position(|key| key == predecessor)
                    .map_or(0, |index| index + 1)
            }
            None => 0,
        };
        self.visible.insert(index, id.to_string());
    }

    fn hide(&mut self, id: &str) {
        self.visible.retain(|key| key != id);
    }
}

enum Emission {
    Child {
        snapshot: MergedSnapshot,
        prev: Option<String>,
    },
    Value(MergedSnapshot),
}

struct SetCore {
    context: MergeContext,
    emitter: Emitter,
    state: Mutex<SetState>,
}

pub(crate) struct SetManager {
    core: Arc<SetCore>,
}

impl SetManager {
    pub(crate) fn new(context: MergeContext, emitter: Emitter) -> Self {
        Self {
            core: Arc::new(SetCore {
                context,
                emitter,
                state: Mutex::new(SetState::default()),
            }),
        }
    }
}

fn master_callback(
    core: &Arc<SetCore>,
    handle: fn(&Arc<SetCore>, &DataSnapshot, Option<&str>),
) -> EventCallback {
    let weak = Arc::downgrade(core);
    Arc::new(move |snapshot: &DataSnapshot, prev: Option<&str>| {
        if let Some(core) = weak.upgrade() {
            handle(&core, snapshot, prev);
        }
    })
}

fn cancel_callback(core: &Arc<SetCore>) -> CancelCallback {
    let weak = Arc::downgrade(core);
    Arc::new(move |err: &BackendError| {
        if let Some(core) = weak.upgrade() {
            core.emitter.cancel(err);
        }
    })
}

impl EventManager for SetManager {
    fn start(&self) {
        self.core.state.lock().unwrap().active = true;
        let master = Arc::clone(self.core.context.paths.master().reference());
        let cancel = cancel_callback(&self.core);
        let mut subscriptions = vec![
            Subscription::listen(
                Arc::clone(&master),
                EventType::ChildAdded,
                master_callback(&self.core, SetCore::master_added),
                Some(Arc::clone(&cancel)),
            ),
            Subscription::listen(
                Arc::clone(&master),
                EventType::ChildRemoved,
                master_callback(&self.core, SetCore::master_removed),
                Some(Arc::clone(&cancel)),
            ),
            Subscription::listen(
                Arc::clone(&master),
                EventType::ChildMoved,
                master_callback(&self.core, SetCore::master_moved),
                Some(Arc::clone(&cancel)),
            ),
        ];
        // Registered last so it reports after the initial child_added events.
        subscriptions.push(Subscription::listen_once(
            master,
            EventType::Value,
            master_callback(&self.core, SetCore::master_loaded),
            Some(cancel),
        ));

        let mut state = self.core.state.lock().unwrap();
        if state.active {
            state.subscriptions = subscriptions;
        }
    }

    fn stop(&self) {
        let (subscriptions, tracked) = {
            let mut state = self.core.state.lock().unwrap();
            let state = std::mem::take(&mut *state);
            let tracked: Vec<Tracked> = state
                .loading
                .into_values()
                .chain(state.recs.into_values())
                .chain(state.filtered.into_values())
                .collect();
            (state.subscriptions, tracked)
        };
        drop(subscriptions);
        for record in tracked {
            record.release();
        }
    }

    fn replay(&self, observer: &Observer) {
        let replayed: Vec<(MergedSnapshot, Option<String>)> = {
            let state = self.core.state.lock().unwrap();
            match self.core.emitter.event() {
                EventType::Value if state.is_complete() => {
                    vec![(self.core.value_snapshot(&state), None)]
                }
                EventType::ChildAdded => state
                    .visible
                    .iter()
                    .filter_map(|id| {
                        let snapshot = state.recs.get(id)?.snapshot.clone()?;
                        Some((snapshot, state.prev_visible(id)))
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

impl SetCore {
    fn wants(&self, event: EventType) -> bool {
        self.emitter.event() == event
    }

    fn deliver(&self, emissions: Vec<Emission>) {
        for emission in emissions {
            match emission {
                Emission::Child { snapshot, prev } => {
                    self.emitter.emit(&snapshot, prev.as_deref())
                }
                Emission::Value(snapshot) => self.emitter.emit(&snapshot, None),
            }
        }
    }

    fn child(&self, state: &SetState, id: &str, event: EventType, emissions: &mut Vec<Emission>) {
        if !self.wants(event) {
            return;
        }
        let tracked = state
            .recs
            .get(id)
            .or_else(|| state.filtered.get(id))
            .or_else(|| state.loading.get(id));
        if let Some(snapshot) = tracked.and_then(|tracked| tracked.snapshot.clone()) {
            emissions.push(Emission::Child {
                snapshot,
                prev: state.prev_visible(id),
            });
        }
    }

    /// The merged value of the set, built from the last value of every
    /// visible record.
    fn value_snapshot(&self, state: &SetState) -> MergedSnapshot {
        let paths = self.context.paths.paths();
        let mut collections: Vec<Map<String, Value>> = vec![Map::new(); paths.len()];
        for id in &state.visible {
            let Some(snapshot) = state.recs.get(id).and_then(|t| t.snapshot.as_ref()) else {
                continue;
            };
            for raw in snapshot.raw().iter() {
                let (Some(index), Some(key)) = (
                    self.context.paths.index_of(&raw.path),
                    raw.snapshot.key(),
                ) else {
                    continue;
                };
                if raw.snapshot.exists() {
                    collections[index].insert(key.to_string(), raw.snapshot.export_val());
                }
            }
        }

        let mut raw = RawSnapshots::new();
        for (index, (path, children)) in paths.iter().zip(collections).enumerate() {
            let node = if children.is_empty() {
                Value::Null
            } else {
                Value::Object(children)
            };
            let mut snapshot = DataSnapshot::new(Arc::clone(path.reference()), node);
            if index == 0 {
                snapshot = snapshot.with_order(ChildOrder::Explicit(state.visible.clone().into()));
            }
            raw.push(path.name(), snapshot);
        }
        MergedSnapshot::new(self.emitter.node().clone(), raw)
    }

    fn value(&self, state: &mut SetState, emissions: &mut Vec<Emission>) {
        if !self.wants(EventType::Value) || !state.is_complete() {
            return;
        }
        let snapshot = self.value_snapshot(state);
        let exported = snapshot.export_val();
        if self.context.config.suppress_duplicate_values
            && state.last_value.as_ref() == Some(&exported)
        {
            return;
        }
        state.last_value = Some(exported);
        emissions.push(Emission::Value(snapshot));
    }

    fn master_added(self: &Arc<Self>, snapshot: &DataSnapshot, prev: Option<&str>) {
        let Some(id) = snapshot.key().map(str::to_string) else {
            return;
        };
        let record = self.emitter.node().child(&id);
        {
            let mut state = self.state.lock().unwrap();
            if !state.active || state.is_tracked(&id) {
                return;
            }
            trace!(record = %id, "tracking record");
            state.place(&id, prev);
            state.loading.insert(
                id.clone(),
                Tracked {
                    node: record.clone(),
                    observer: None,
                    snapshot: None,
                },
            );
        }
        // A record that is already observed replays its value from inside
        // `track`, so it must be tracked beforehand.
        let observer = record.track(
            EventType::Value,
            self.record_callback(&id),
            Some(self.record_cancel()),
        );

        let mut state = self.state.lock().unwrap();
        let active = state.active;
        match state.tracked_mut(&id) {
            Some(tracked) if active && tracked.observer.is_none() => {
                tracked.observer = Some(observer);
            }
            _ => {
                drop(state);
                record.off(Some(EventType::Value), Some(observer));
            }
        }
    }

    fn master_removed(self: &Arc<Self>, snapshot: &DataSnapshot, _prev: Option<&str>) {
        let Some(id) = snapshot.key() else {
            return;
        };
        let mut emissions = Vec::new();
        let removed = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            if let Some(waiting) = state.waiting.as_mut() {
                waiting.remove(id);
            }
            state.order.retain(|key| key != id);
            let removed = if let Some(tracked) = state.recs.remove(id) {
                if self.wants(EventType::ChildRemoved) {
                    if let Some(snapshot) = tracked.snapshot.clone() {
                        emissions.push(Emission::Child {
                            snapshot,
                            prev: None,
                        });
                    }
                }
                state.hide(id);
                Some(tracked)
            } else {
                state
                    .loading
                    .remove(id)
                    .or_else(|| state.filtered.remove(id))
            };
            if removed.is_some() {
                self.value(&mut state, &mut emissions);
            }
            removed
        };
        if let Some(tracked) = removed {
            tracked.release();
        }
        self.deliver(emissions);
    }

    fn master_moved(self: &Arc<Self>, snapshot: &DataSnapshot, prev: Option<&str>) {
        let Some(id) = snapshot.key() else {
            return;
        };
        let mut emissions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.active || !state.is_tracked(id) {
                return;
            }
            state.place(id, prev);
            if state.recs.contains_key(id) {
                state.show(id);
                self.child(&state, id, EventType::ChildMoved, &mut emissions);
                self.value(&mut state, &mut emissions);
            }
        }
        self.deliver(emissions);
    }

    fn master_loaded(self: &Arc<Self>, snapshot: &DataSnapshot, _prev: Option<&str>) {
        let mut emissions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            let waiting: HashSet<String> = snapshot
                .child_keys()
                .into_iter()
                .filter(|id| state.loading.contains_key(id))
                .collect();
            debug!(
                records = snapshot.num_children(),
                waiting = waiting.len(),
                "master enumerated"
            );
            state.waiting = Some(waiting);
            self.value(&mut state, &mut emissions);
        }
        self.deliver(emissions);
    }

    fn passes(&self, id: &str, snapshot: &MergedSnapshot) -> bool {
        let data = snapshot.val();
        !data.is_null() && self.context.filter.test(&data, id, &snapshot.priority())
    }

    fn record_value(&self, id: &str, snapshot: &MergedSnapshot) {
        let passes = self.passes(id, snapshot);
        let mut emissions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            if let Some(mut tracked) = state.loading.remove(id) {
                tracked.snapshot = Some(snapshot.clone());
                if passes {
                    state.recs.insert(id.to_string(), tracked);
                    state.show(id);
                    self.child(&state, id, EventType::ChildAdded, &mut emissions);
                } else {
                    state.filtered.insert(id.to_string(), tracked);
                }
            } else if state.recs.contains_key(id) {
                if passes {
                    if let Some(tracked) = state.recs.get_mut(id) {
                        tracked.snapshot = Some(snapshot.clone());
                    }
                    self.child(&state, id, EventType::ChildChanged, &mut emissions);
                } else if let Some(mut tracked) = state.recs.remove(id) {
                    if self.wants(EventType::ChildRemoved) {
                        if let Some(last) = tracked.snapshot.clone() {
                            emissions.push(Emission::Child {
                                snapshot: last,
                                prev: None,
                            });
                        }
                    }
                    state.hide(id);
                    tracked.snapshot = Some(snapshot.clone());
                    state.filtered.insert(id.to_string(), tracked);
                }
            } else if state.filtered.contains_key(id) {
                if let Some(mut tracked) = state.filtered.remove(id) {
                    tracked.snapshot = Some(snapshot.clone());
                    if passes {
                        state.recs.insert(id.to_string(), tracked);
                        state.show(id);
                        self.child(&state, id, EventType::ChildAdded, &mut emissions);
                    } else {
                        state.filtered.insert(id.to_string(), tracked);
                    }
                }
            } else {
                debug!(record = %id, "ignoring value of untracked record");
                return;
            }
            if let Some(waiting) = state.waiting.as_mut() {
                waiting.remove(id);
            }
            self.value(&mut state, &mut emissions);
        }
        self.deliver(emissions);
    }

    fn record_callback(self: &Arc<Self>, id: &str) -> MergedCallback {
        let weak = Arc::downgrade(self);
        let id = id.to_string();
        Arc::new(move |snapshot: &MergedSnapshot, _: Option<&str>| {
            if let Some(core) = weak.upgrade() {
                core.record_value(&id, snapshot);
            }
        })
    }

    fn record_cancel(self: &Arc<Self>) -> MergedCancel {
        let weak = Arc::downgrade(self);
        Arc::new(move |err: &BackendError| {
            if let Some(core) = weak.upgrade() {
                core.emitter.cancel(err);
            }
        })
    }
}
