//! In-process backing store
//!
//! [`MemoryStore`] keeps one JSON tree and implements [`BackingRef`] over it
//! through [`MemoryRef`] handles. Nothing is delivered while a call is in
//! progress: every event and every write completion becomes a task, and
//! [`MemoryStore::flush`] runs the queued tasks in order.
//!
//! ```
//! use mergeview::backend::{BackingRef, EventType, MemoryStore};
//! use mergeview::data::DataSnapshot;
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let store = MemoryStore::new();
//! let users = store.reference("users");
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! users.on(
//!     EventType::ChildAdded,
//!     Arc::new(move |snap: &DataSnapshot, _prev: Option<&str>| {
//!         sink.lock().unwrap().push(snap.key().unwrap().to_string());
//!     }),
//!     None,
//! );
//! users.child("ada").set(json!({"name": "Ada"}), None);
//! assert!(seen.lock().unwrap().is_empty());
//!
//! store.flush();
//! assert_eq!(*seen.lock().unwrap(), vec!["ada".to_string()]);
//! ```

mod persistence;
mod push_id;
mod storage;
mod views;

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use self::push_id::PushIdGenerator;
use self::storage::{WriteOp, node_at};
use self::views::{Delivery, Listener};
use super::{
    BackendError, BackingRef, CancelCallback, CompletionCallback, EventCallback, EventType,
    ListenerId, QueryOp, QueryParams,
};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::data::{is_meta_key, split_path, strip_export};

const BASE_URL: &str = "memory://local";

/// Authentication and connection state recorded by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub token: Option<String>,
    pub online: bool,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            token: None,
            online: true,
        }
    }
}

/// A queued callback.
pub(super) struct Task {
    /// Tasks of a listener are dropped once the listener is removed.
    listener: Option<ListenerId>,
    /// Running the task removes its listener.
    once: bool,
    run: Box<dyn FnOnce() + Send>,
}

impl Task {
    fn detached(run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            listener: None,
            once: false,
            run: Box::new(run),
        }
    }
}

#[derive(Debug, Default)]
struct Rules {
    deny_read: Vec<Vec<String>>,
    deny_write: Vec<Vec<String>>,
    fail_next: Vec<Vec<String>>,
}

impl Rules {
    fn read_denied(&self, path: &[String]) -> bool {
        self.deny_read.iter().any(|denied| path.starts_with(denied))
    }

    fn write_denied(&self, path: &[String]) -> Option<&[String]> {
        self.deny_write
            .iter()
            .find(|denied| path.starts_with(denied))
            .map(Vec::as_slice)
    }

    fn take_failure(&mut self, path: &[String]) -> bool {
        match self.fail_next.iter().position(|p| p == path) {
            Some(pos) => {
                self.fail_next.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct StoreInner {
    data: RwLock<Value>,
    listeners: Mutex<Vec<Listener>>,
    tasks: Mutex<VecDeque<Task>>,
    rules: Mutex<Rules>,
    session: Mutex<SessionInfo>,
    push_ids: PushIdGenerator,
    next_listener: AtomicU64,
}

impl StoreInner {
    fn url_of(path: &[String]) -> String {
        if path.is_empty() {
            BASE_URL.to_string()
        } else {
            format!("{BASE_URL}/{}", path.join("/"))
        }
    }

    fn enqueue(&self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.lock().unwrap().extend(tasks);
    }

    fn complete(
        &self,
        on_complete: Option<CompletionCallback>,
        result: std::result::Result<(), BackendError>,
    ) {
        if let Some(callback) = on_complete {
            self.enqueue([Task::detached(move || callback(result))]);
        }
    }

    fn register(
        &self,
        reference: &MemoryRef,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
        once: bool,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));

        if self.rules.lock().unwrap().read_denied(&reference.path) {
            debug!(url = %reference.url(), %event, "read denied, cancelling listener");
            if let Some(cancel) = cancel {
                let err = BackendError::PermissionDenied {
                    path: reference.url(),
                };
                self.enqueue([Task::detached(move || cancel(&err))]);
            }
            return id;
        }

        let data = self.data.read().unwrap();
        let listener = Listener::new(id, reference.clone(), event, callback, cancel, once, &data);
        let initial: Vec<Task> = listener
            .initial()
            .into_iter()
            .map(Delivery::into_task)
            .collect();
        trace!(url = %reference.url(), %event, listener = id.0, "listener registered");
        self.listeners.lock().unwrap().push(listener);
        self.enqueue(initial);
        id
    }

    fn unregister(&self, reference: &MemoryRef, event: Option<EventType>, id: Option<ListenerId>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|listener| !listener.matches(reference, event, id));
    }

    fn write(
        &self,
        target: &[String],
        ops: Vec<WriteOp>,
        on_complete: Option<CompletionCallback>,
    ) {
        {
            let mut rules = self.rules.lock().unwrap();
            if let Some(denied) = ops.iter().find_map(|op| rules.write_denied(op.path())) {
                let err = BackendError::PermissionDenied {
                    path: Self::url_of(denied),
                };
                drop(rules);
                debug!(url = %Self::url_of(target), "write denied");
                self.complete(on_complete, Err(err));
                return;
            }
            if rules.take_failure(target) {
                drop(rules);
                let err = BackendError::WriteFailed {
                    path: Self::url_of(target),
                    reason: "injected failure".to_string(),
                };
                debug!(url = %Self::url_of(target), "write failed");
                self.complete(on_complete, Err(err));
                return;
            }
        }

        let mut data = self.data.write().unwrap();
        for op in ops {
            op.apply(&mut data);
        }
        trace!(url = %Self::url_of(target), "write applied");

        let mut deliveries: Vec<Delivery> = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners
                .iter_mut()
                .flat_map(|listener| listener.refresh(&data))
                .collect()
        };
        deliveries.sort_by_key(|delivery| delivery.event.rank());
        self.enqueue(deliveries.into_iter().map(Delivery::into_task));
        drop(data);
        self.complete(on_complete, Ok(()));
    }
}

/// An in-process backing store.
///
/// Clones share the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("listeners", &self.listener_count())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store whose push ids are stamped by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(Value::Null),
                listeners: Mutex::new(Vec::new()),
                tasks: Mutex::new(VecDeque::new()),
                rules: Mutex::new(Rules::default()),
                session: Mutex::new(SessionInfo::default()),
                push_ids: PushIdGenerator::new(clock),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// A handle on the location at `path` (`/`-separated, empty for the root).
    pub fn reference(&self, path: &str) -> Arc<dyn BackingRef> {
        Arc::new(self.memory_ref(path))
    }

    /// Like [`MemoryStore::reference`], returning the concrete handle.
    pub fn memory_ref(&self, path: &str) -> MemoryRef {
        MemoryRef {
            store: Arc::clone(&self.inner),
            path: split_path(path),
            params: QueryParams::default(),
        }
    }

    /// Runs queued tasks, including tasks queued by the tasks themselves,
    /// until the queue is empty. Returns the number of tasks run.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.tasks.lock().unwrap().pop_front();
            let Some(task) = next else {
                break;
            };
            if let Some(id) = task.listener {
                let mut listeners = self.inner.listeners.lock().unwrap();
                let Some(pos) = listeners.iter().position(|l| l.id == id) else {
                    continue;
                };
                if task.once {
                    listeners.remove(pos);
                }
            }
            (task.run)();
            ran += 1;
        }
        ran
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.lock().unwrap().len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }

    /// The plain value at `path`.
    pub fn value(&self, path: &str) -> Value {
        strip_export(&self.export_value(path))
    }

    /// The value at `path` in export form.
    pub fn export_value(&self, path: &str) -> Value {
        node_at(&self.inner.data.read().unwrap(), &split_path(path))
    }

    /// Refuses reads at and below `path`. Listeners already registered there
    /// are cancelled with [`BackendError::PermissionDenied`].
    pub fn deny_read(&self, path: &str) {
        let denied = split_path(path);
        self.inner.rules.lock().unwrap().deny_read.push(denied.clone());

        let cancelled: Vec<Listener> = {
            let mut listeners = self.inner.listeners.lock().unwrap();
            let (cancelled, kept): (Vec<Listener>, Vec<Listener>) =
                listeners.drain(..).partition(|l| l.is_under(&denied));
            *listeners = kept;
            cancelled
        };
        debug!(path, cancelled = cancelled.len(), "read access revoked");
        let tasks = cancelled.into_iter().filter_map(|listener| {
            let cancel = listener.cancel?;
            let err = BackendError::PermissionDenied {
                path: listener.reference.url(),
            };
            Some(Task::detached(move || cancel(&err)))
        });
        self.inner.enqueue(tasks);
    }

    pub fn allow_read(&self, path: &str) {
        let path = split_path(path);
        self.inner.rules.lock().unwrap().deny_read.retain(|p| *p != path);
    }

    /// Refuses writes at and below `path`.
    pub fn deny_write(&self, path: &str) {
        self.inner.rules.lock().unwrap().deny_write.push(split_path(path));
    }

    pub fn allow_write(&self, path: &str) {
        let path = split_path(path);
        self.inner.rules.lock().unwrap().deny_write.retain(|p| *p != path);
    }

    /// Makes the next write targeting exactly `path` fail.
    pub fn fail_next_write(&self, path: &str) {
        self.inner.rules.lock().unwrap().fail_next.push(split_path(path));
    }

    pub fn session(&self) -> SessionInfo {
        self.inner.session.lock().unwrap().clone()
    }

    /// Saves the stored tree to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path)
    }

    /// Loads a store saved with [`MemoryStore::save_to_file`].
    ///
    /// If the file does not exist, a new, empty store is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path)
    }
}

/// A location in a [`MemoryStore`], optionally narrowed by a query.
#[derive(Clone)]
pub struct MemoryRef {
    store: Arc<StoreInner>,
    pub(super) path: Vec<String>,
    pub(super) params: QueryParams,
}

impl fmt::Debug for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRef")
            .field("url", &self.url())
            .field("params", &self.params)
            .finish()
    }
}

impl MemoryRef {
    fn at(&self, path: Vec<String>) -> MemoryRef {
        MemoryRef {
            store: Arc::clone(&self.store),
            path,
            params: QueryParams::default(),
        }
    }

    fn joined(&self, relative: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.extend(split_path(relative));
        path
    }
}

impl BackingRef for MemoryRef {
    fn key(&self) -> Option<String> {
        self.path.last().cloned()
    }

    fn url(&self) -> String {
        StoreInner::url_of(&self.path)
    }

    fn child(&self, path: &str) -> Arc<dyn BackingRef> {
        Arc::new(self.at(self.joined(path)))
    }

    fn parent(&self) -> Option<Arc<dyn BackingRef>> {
        let (_, parent) = self.path.split_last()?;
        Some(Arc::new(self.at(parent.to_vec())))
    }

    fn root(&self) -> Arc<dyn BackingRef> {
        Arc::new(self.at(Vec::new()))
    }

    fn query(&self, op: QueryOp) -> Arc<dyn BackingRef> {
        Arc::new(MemoryRef {
            store: Arc::clone(&self.store),
            path: self.path.clone(),
            params: self.params.apply(op),
        })
    }

    fn query_identifier(&self) -> String {
        self.params.identifier()
    }

    fn on(
        &self,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> ListenerId {
        self.store.register(self, event, callback, cancel, false)
    }

    fn once(
        &self,
        event: EventType,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
    ) -> ListenerId {
        self.store.register(self, event, callback, cancel, true)
    }

    fn off(&self, event: Option<EventType>, listener: Option<ListenerId>) {
        self.store.unregister(self, event, listener);
    }

    fn set(&self, value: Value, on_complete: Option<CompletionCallback>) {
        let op = WriteOp::Set(self.path.clone(), value);
        self.store.write(&self.path, vec![op], on_complete);
    }

    fn update(&self, values: Map<String, Value>, on_complete: Option<CompletionCallback>) {
        let mut ops = Vec::with_capacity(values.len());
        let mut priorities = Vec::new();
        for (key, value) in values {
            let relative = split_path(&key);
            let misplaced_meta = relative
                .iter()
                .rev()
                .skip(1)
                .any(|component| is_meta_key(component));
            if relative.is_empty() || misplaced_meta {
                let err = BackendError::InvalidData {
                    reason: format!("invalid update key '{key}'"),
                };
                self.store.complete(on_complete, Err(err));
                return;
            }
            let path = self.joined(&key);
            if relative.last().is_some_and(|last| last == crate::constants::PRIORITY_KEY) {
                priorities.push(WriteOp::Priority(path[..path.len() - 1].to_vec(), value));
            } else {
                ops.push(WriteOp::Set(path, value));
            }
        }
        // Priorities attach to the nodes the same update creates.
        ops.extend(priorities);
        self.store.write(&self.path, ops, on_complete);
    }

    fn set_priority(&self, priority: Value, on_complete: Option<CompletionCallback>) {
        let op = WriteOp::Priority(self.path.clone(), priority);
        self.store.write(&self.path, vec![op], on_complete);
    }

    fn push(
        &self,
        value: Option<Value>,
        on_complete: Option<CompletionCallback>,
    ) -> Arc<dyn BackingRef> {
        let key = self.store.push_ids.next_id();
        let child = self.at(self.joined(&key));
        match value {
            Some(value) => child.set(value, on_complete),
            None => self.store.complete(on_complete, Ok(())),
        }
        Arc::new(child)
    }

    fn auth(&self, token: &str) {
        self.store.session.lock().unwrap().token = Some(token.to_string());
    }

    fn unauth(&self) {
        self.store.session.lock().unwrap().token = None;
    }

    fn go_online(&self) {
        self.store.session.lock().unwrap().online = true;
    }

    fn go_offline(&self) {
        self.store.session.lock().unwrap().online = false;
    }
}
