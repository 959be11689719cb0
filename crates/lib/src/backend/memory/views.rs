//! Per-listener views and the events derived from them.

use std::sync::Arc;

use serde_json::Value;

use super::storage::node_at;
use super::{MemoryRef, Task};
use crate::backend::{BackingRef, CancelCallback, EventCallback, EventType, ListenerId};
use crate::data::{ChildOrder, DataSnapshot, diff_children};

/// One registered listener and the last state it was shown.
pub(super) struct Listener {
    pub(super) id: ListenerId,
    pub(super) reference: MemoryRef,
    pub(super) event: EventType,
    pub(super) callback: EventCallback,
    pub(super) cancel: Option<CancelCallback>,
    pub(super) once: bool,
    children: Vec<(String, Value)>,
    value: Value,
}

/// An event waiting to be queued.
pub(super) struct Delivery {
    pub(super) event: EventType,
    listener: ListenerId,
    once: bool,
    callback: EventCallback,
    snapshot: DataSnapshot,
    prev: Option<String>,
}

impl Delivery {
    pub(super) fn into_task(self) -> Task {
        let Delivery {
            listener,
            once,
            callback,
            snapshot,
            prev,
            ..
        } = self;
        Task {
            listener: Some(listener),
            once,
            run: Box::new(move || callback(&snapshot, prev.as_deref())),
        }
    }
}

impl Listener {
    pub(super) fn new(
        id: ListenerId,
        reference: MemoryRef,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
        once: bool,
        root: &Value,
    ) -> Self {
        let mut listener = Self {
            id,
            reference,
            event,
            callback,
            cancel,
            once,
            children: Vec::new(),
            value: Value::Null,
        };
        let (value, children) = listener.compute(root);
        listener.value = value;
        listener.children = children;
        listener
    }

    fn compute(&self, root: &Value) -> (Value, Vec<(String, Value)>) {
        let node = node_at(root, &self.reference.path);
        let params = &self.reference.params;
        (params.view(&node), params.visible_children(&node))
    }

    fn handle(&self) -> Arc<dyn BackingRef> {
        Arc::new(self.reference.clone())
    }

    fn delivery(&self, snapshot: DataSnapshot, prev: Option<String>) -> Delivery {
        Delivery {
            event: self.event,
            listener: self.id,
            once: self.once,
            callback: Arc::clone(&self.callback),
            snapshot,
            prev,
        }
    }

    fn value_snapshot(&self) -> DataSnapshot {
        DataSnapshot::new(self.handle(), self.value.clone())
            .with_order(ChildOrder::Index(self.reference.params.index().clone()))
    }

    fn child_snapshot(&self, key: &str, node: Value) -> DataSnapshot {
        DataSnapshot::new(self.reference.child(key), node)
    }

    /// The events a newly registered listener receives.
    pub(super) fn initial(&self) -> Vec<Delivery> {
        match self.event {
            EventType::Value => vec![self.delivery(self.value_snapshot(), None)],
            EventType::ChildAdded => {
                let mut prev: Option<String> = None;
                let mut out = Vec::with_capacity(self.children.len());
                for (key, node) in &self.children {
                    out.push(self.delivery(self.child_snapshot(key, node.clone()), prev.clone()));
                    prev = Some(key.clone());
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Recomputes the view after a write and returns the events it raises.
    pub(super) fn refresh(&mut self, root: &Value) -> Vec<Delivery> {
        let (value, children) = self.compute(root);
        let mut out = Vec::new();
        if self.event == EventType::Value {
            if value != self.value {
                self.value = value;
                out.push(self.delivery(self.value_snapshot(), None));
            }
        } else {
            for change in diff_children(&self.children, &children, self.reference.params.index()) {
                if change.event == self.event {
                    let snapshot = self.child_snapshot(&change.key, change.node);
                    out.push(self.delivery(snapshot, change.prev));
                }
            }
            self.value = value;
        }
        self.children = children;
        out
    }

    /// True if the listener observes `path` or a location below it.
    pub(super) fn is_under(&self, path: &[String]) -> bool {
        self.reference.path.starts_with(path)
    }

    /// True if `off` on `reference` with these arguments removes this listener.
    pub(super) fn matches(
        &self,
        reference: &MemoryRef,
        event: Option<EventType>,
        id: Option<ListenerId>,
    ) -> bool {
        self.reference.path == reference.path
            && self.reference.params == reference.params
            && event.is_none_or(|event| event == self.event)
            && id.is_none_or(|id| id == self.id)
    }
}
