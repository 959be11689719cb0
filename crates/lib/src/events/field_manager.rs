//! Events of a merged field.
//!
//! A field on a static path is a plain backing location, so its events are
//! forwarded one to one. A field on a dynamic path follows the merged value of
//! its record and diffs the part it covers.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::{Emitter, EventManager};
use crate::backend::{
    BackendError, BackingRef, CancelCallback, EventCallback, EventType, Subscription,
};
use crate::data::{DataSnapshot, Index, diff_children};
use crate::record::{
    FieldTarget, MergedCallback, MergedCancel, MergedSnapshot, Observer, ObserverId,
    RawSnapshots, RecordBehavior, RecordField, RecordNode,
};

#[derive(Default)]
struct FieldState {
    active: bool,
    subscription: Option<Subscription>,
    record: Option<(RecordNode, ObserverId)>,
    last: Option<MergedSnapshot>,
    last_value: Option<Value>,
    last_children: Vec<(String, Value)>,
}

struct FieldCore {
    emitter: Emitter,
    /// Alias of the path the field reads from.
    path: String,
    target: FieldTarget,
    state: Mutex<FieldState>,
}

pub(crate) struct FieldManager {
    core: Arc<FieldCore>,
}

impl FieldManager {
    pub(crate) fn new(field: &RecordField, emitter: Emitter) -> Self {
        Self {
            core: Arc::new(FieldCore {
                emitter,
                path: field.path().to_string(),
                target: field.target().clone(),
                state: Mutex::new(FieldState::default()),
            }),
        }
    }
}

impl EventManager for FieldManager {
    fn start(&self) {
        self.core.state.lock().unwrap().active = true;
        match &self.core.target {
            FieldTarget::Static(reference) => self.core.listen(Arc::clone(reference)),
            FieldTarget::Dynamic { record, .. } => self.core.follow(record.clone()),
        }
    }

    fn stop(&self) {
        let state = std::mem::take(&mut *self.core.state.lock().unwrap());
        if let Some((record, observer)) = &state.record {
            record.off(Some(EventType::Value), Some(*observer));
        }
    }

    fn replay(&self, observer: &Observer) {
        let event = self.core.emitter.event();
        let (last, children) = {
            let state = self.core.state.lock().unwrap();
            (state.last.clone(), state.last_children.clone())
        };
        match (event, &self.core.target) {
            (EventType::Value, _) => {
                if let Some(last) = last {
                    observer.notify(&last, None);
                }
            }
            (EventType::ChildAdded, FieldTarget::Static(reference)) => {
                self.core.replay_children(Arc::clone(reference), observer.clone())
            }
            (EventType::ChildAdded, FieldTarget::Dynamic { .. }) => {
                let Some(last) = last else {
                    return;
                };
                for (index, (key, _)) in children.iter().enumerate() {
                    let prev = index.checked_sub(1).map(|prev| children[prev].0.as_str());
                    observer.notify(&last.child(key), prev);
                }
            }
            _ => {}
        }
    }
}

impl FieldCore {
    fn cancel_callback(self: &Arc<Self>) -> CancelCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |err: &BackendError| {
            if let Some(core) = weak.upgrade() {
                core.emitter.cancel(err);
            }
        })
    }

    fn listen(self: &Arc<Self>, reference: Arc<dyn BackingRef>) {
        let event = self.emitter.event();
        let callback: EventCallback = {
            let weak = Arc::downgrade(self);
            Arc::new(move |snapshot: &DataSnapshot, prev: Option<&str>| {
                if let Some(core) = weak.upgrade() {
                    core.forward(snapshot, prev);
                }
            })
        };
        let subscription =
            Subscription::listen(reference, event, callback, Some(self.cancel_callback()));
        let mut state = self.state.lock().unwrap();
        if state.active {
            state.subscription = Some(subscription);
        }
    }

    fn merged(&self, node: &RecordNode, snapshot: &DataSnapshot) -> MergedSnapshot {
        let node = match snapshot.key() {
            Some(key) if self.emitter.event().is_child_event() => node.child(key),
            _ => node.clone(),
        };
        MergedSnapshot::new(node, RawSnapshots::single(&self.path, snapshot.clone()))
    }

    fn forward(&self, snapshot: &DataSnapshot, prev: Option<&str>) {
        let merged = self.merged(self.emitter.node(), snapshot);
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            if self.emitter.event() == EventType::Value {
                state.last = Some(merged.clone());
            }
        }
        self.emitter.emit(&merged, prev);
    }

    /// Sends the current children of `reference` to one late observer.
    fn replay_children(self: &Arc<Self>, reference: Arc<dyn BackingRef>, observer: Observer) {
        let weak = Arc::downgrade(self);
        reference.once(
            EventType::Value,
            Arc::new(move |snapshot: &DataSnapshot, _: Option<&str>| {
                let Some(core) = weak.upgrade() else {
                    return;
                };
                let node = core.emitter.node();
                let mut prev: Option<String> = None;
                snapshot.for_each(|child| {
                    let key = child.key().map(str::to_string).unwrap_or_default();
                    let merged = MergedSnapshot::new(
                        node.child(&key),
                        RawSnapshots::single(&core.path, child),
                    );
                    observer.notify(&merged, prev.as_deref());
                    prev = Some(key);
                    false
                });
            }),
            None,
        );
    }

    fn follow(self: &Arc<Self>, record: RecordNode) {
        let callback: MergedCallback = {
            let weak = Arc::downgrade(self);
            Arc::new(move |snapshot: &MergedSnapshot, _: Option<&str>| {
                if let Some(core) = weak.upgrade() {
                    core.record_value(snapshot);
                }
            })
        };
        let cancel: MergedCancel = self.cancel_callback();
        let observer = record.track(EventType::Value, callback, Some(cancel));
        let mut state = self.state.lock().unwrap();
        if state.active {
            state.record = Some((record, observer));
        } else {
            drop(state);
            record.off(Some(EventType::Value), Some(observer));
        }
    }

    /// The raw snapshots of this field inside a merged record snapshot.
    fn locate(&self, record: &MergedSnapshot) -> RawSnapshots {
        let FieldTarget::Dynamic { alias, subpath, .. } = &self.target else {
            return RawSnapshots::new();
        };
        let mut raw = record.node().kind().get_child_snaps(record.raw(), alias);
        for key in subpath {
            raw = match raw.get(&self.path) {
                Some(snapshot) => RawSnapshots::single(&self.path, snapshot.child(key)),
                None => RawSnapshots::new(),
            };
        }
        raw
    }

    fn record_value(&self, record: &MergedSnapshot) {
        let merged = MergedSnapshot::new(self.emitter.node().clone(), self.locate(record));
        let mut emissions: Vec<(MergedSnapshot, Option<String>)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            match self.emitter.event() {
                EventType::Value => {
                    let exported = merged.export_val();
                    let unchanged =
                        state.last.is_some() && state.last_value.as_ref() == Some(&exported);
                    state.last = Some(merged.clone());
                    if !unchanged {
                        state.last_value = Some(exported);
                        emissions.push((merged, None));
                    }
                }
                event => {
                    let mut children = Vec::new();
                    merged.for_each(|child| {
                        children.push((child.key(), child.export_val()));
                        false
                    });
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
        for (snapshot, prev) in emissions {
            self.emitter.emit(&snapshot, prev.as_deref());
        }
    }
}
