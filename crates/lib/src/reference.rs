//! The public handle on a merged view.
//!
//! A [`MergedRef`] behaves like a reference into a hierarchical store, except
//! that the data it reads is merged from several paths and the writes it
//! receives are split back across them.
//!
//! ```
//! use mergeview::backend::{EventType, MemoryStore};
//! use mergeview::collection::{Collection, Path};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! # fn main() -> mergeview::Result<()> {
//! let store = MemoryStore::new();
//! let mut collection = Collection::new([
//!     Path::new(store.reference("users")),
//!     Path::new(store.reference("profiles")),
//! ])?;
//! collection.select("users.name")?.select("profiles.bio")?;
//! let merged = collection.reference()?;
//!
//! merged.child("alice").set(json!({"name": "Alice", "bio": "hi"}), None)?;
//! store.flush();
//! assert_eq!(store.value("profiles/alice"), json!({"bio": "hi"}));
//!
//! let seen = Arc::new(Mutex::new(None));
//! let sink = seen.clone();
//! merged.once(EventType::Value, move |snapshot, _| {
//!     *sink.lock().unwrap() = Some(snapshot.val());
//! });
//! store.flush();
//! assert_eq!(
//!     seen.lock().unwrap().clone(),
//!     Some(json!({"alice": {"name": "Alice", "bio": "hi"}}))
//! );
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::Result;
use crate::backend::{BackendError, EventType, QueryOp};
use crate::data::{is_valid_priority, split_path, with_priority};
use crate::record::{
    FieldTarget, MergedSnapshot, ObserverId, RecordError, RecordKind, RecordNode, WriteCallback,
    WriteMode, WriteResult,
};

/// A location in a merged view: the set, a record, or a location inside a
/// record's field.
#[derive(Clone)]
pub struct MergedRef {
    node: RecordNode,
}

impl fmt::Debug for MergedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MergedRef").field(&self.node.describe()).finish()
    }
}

/// Addresses of the underlying locations; bracketed when there are several.
impl fmt::Display for MergedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node.describe())
    }
}

/// Resolves once a merged write has been acknowledged by every path it
/// touched.
///
/// ```
/// # use mergeview::backend::MemoryStore;
/// # use mergeview::collection::{Collection, Path};
/// # use serde_json::json;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mergeview::Result<()> {
/// let store = MemoryStore::new();
/// let mut collection = Collection::new([Path::new(store.reference("users"))])?;
/// collection.select("users.name")?;
/// let merged = collection.reference()?;
///
/// let done = merged.child("bob").set_async(json!({"name": "Bob"}))?;
/// store.flush();
/// assert!(done.wait().await.is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WriteCompletion {
    target: String,
    receiver: oneshot::Receiver<WriteResult>,
}

impl WriteCompletion {
    fn channel(target: String) -> (WriteCallback, Self) {
        let (sender, receiver) = oneshot::channel();
        let callback: WriteCallback = Box::new(move |result| {
            let _ = sender.send(result);
        });
        (callback, Self { target, receiver })
    }

    /// Waits for the outcome of the write.
    pub async fn wait(self) -> WriteResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(vec![
                RecordError::WriteAbandoned {
                    target: self.target,
                }
                .into(),
            ]),
        }
    }
}

fn check_priority(priority: &Value) -> std::result::Result<(), RecordError> {
    if is_valid_priority(priority) {
        Ok(())
    } else {
        Err(RecordError::InvalidPriority {
            priority: priority.to_string(),
        })
    }
}

impl MergedRef {
    pub(crate) fn from_node(node: RecordNode) -> Self {
        Self { node }
    }

    /// The key of this location: the record id, the field alias, or the
    /// bracketed path aliases at set level.
    pub fn key(&self) -> String {
        use crate::record::RecordBehavior;
        self.node.kind().key()
    }

    /// A descendant location; `path` may contain `/`.
    pub fn child(&self, path: &str) -> MergedRef {
        let mut node = self.node.clone();
        for key in split_path(path) {
            node = node.child(&key);
        }
        MergedRef::from_node(node)
    }

    /// The enclosing location; `None` at set level.
    pub fn parent(&self) -> Option<MergedRef> {
        self.node.parent().map(MergedRef::from_node)
    }

    /// The set-level reference.
    pub fn root(&self) -> MergedRef {
        MergedRef::from_node(self.node.root_node())
    }

    /// Listens for `event`. Child events pass the key of the preceding
    /// child.
    ///
    /// Like listeners of a backing store, the listener is attached to the
    /// location rather than to this handle: it stays registered until
    /// [`MergedRef::off`] is called on any reference to the same location, or
    /// until a backing store cancels it.
    pub fn on<F>(&self, event: EventType, callback: F) -> ObserverId
    where
        F: Fn(&MergedSnapshot, Option<&str>) + Send + Sync + 'static,
    {
        self.node.on(event, Arc::new(callback), None)
    }

    /// Like [`MergedRef::on`]; `cancel` runs if the listener is revoked by a
    /// backing store.
    pub fn on_with_cancel<F, C>(&self, event: EventType, callback: F, cancel: C) -> ObserverId
    where
        F: Fn(&MergedSnapshot, Option<&str>) + Send + Sync + 'static,
        C: Fn(&BackendError) + Send + Sync + 'static,
    {
        self.node
            .on(event, Arc::new(callback), Some(Arc::new(cancel)))
    }

    /// Listens for the first `event` only.
    pub fn once<F>(&self, event: EventType, callback: F) -> ObserverId
    where
        F: Fn(&MergedSnapshot, Option<&str>) + Send + Sync + 'static,
    {
        self.node.once(event, Arc::new(callback), None)
    }

    /// Removes listeners: all of them, those of `event`, or one.
    pub fn off(&self, event: Option<EventType>, observer: Option<ObserverId>) {
        self.node.off(event, observer);
    }

    /// Number of listeners of `event` at this location.
    pub fn listener_count(&self, event: EventType) -> usize {
        self.node.observer_count(event)
    }

    /// Applies a query operation.
    ///
    /// At set level the query narrows the master path. On a field of a
    /// static path it narrows that location. Records cannot be queried.
    pub fn query(&self, op: QueryOp) -> Result<MergedRef> {
        Ok(MergedRef::from_node(self.node.query(op)?))
    }

    pub fn order_by_key(&self) -> Result<MergedRef> {
        self.query(QueryOp::OrderByKey)
    }

    pub fn order_by_child(&self, path: &str) -> Result<MergedRef> {
        self.query(QueryOp::OrderByChild(path.to_string()))
    }

    pub fn order_by_value(&self) -> Result<MergedRef> {
        self.query(QueryOp::OrderByValue)
    }

    pub fn order_by_priority(&self) -> Result<MergedRef> {
        self.query(QueryOp::OrderByPriority)
    }

    pub fn limit_to_first(&self, limit: usize) -> Result<MergedRef> {
        self.query(QueryOp::LimitToFirst(limit))
    }

    pub fn limit_to_last(&self, limit: usize) -> Result<MergedRef> {
        self.query(QueryOp::LimitToLast(limit))
    }

    pub fn start_at(&self, value: Value, key: Option<&str>) -> Result<MergedRef> {
        self.query(QueryOp::StartAt(value, key.map(str::to_string)))
    }

    pub fn end_at(&self, value: Value, key: Option<&str>) -> Result<MergedRef> {
        self.query(QueryOp::EndAt(value, key.map(str::to_string)))
    }

    pub fn equal_to(&self, value: Value, key: Option<&str>) -> Result<MergedRef> {
        self.query(QueryOp::EqualTo(value, key.map(str::to_string)))
    }

    /// Replaces the data at this location on every path it covers.
    pub fn set(&self, value: Value, on_complete: Option<WriteCallback>) -> Result<()> {
        Ok(self.node.save(value, WriteMode::Set, on_complete)?)
    }

    /// Writes the given children, leaving others untouched.
    pub fn update(&self, values: Value, on_complete: Option<WriteCallback>) -> Result<()> {
        if !values.is_object() {
            return Err(RecordError::UpdateRequiresObject {
                target: self.to_string(),
            }
            .into());
        }
        Ok(self.node.save(values, WriteMode::Update, on_complete)?)
    }

    pub fn remove(&self, on_complete: Option<WriteCallback>) -> Result<()> {
        self.set(Value::Null, on_complete)
    }

    pub fn set_with_priority(
        &self,
        value: Value,
        priority: Value,
        on_complete: Option<WriteCallback>,
    ) -> Result<()> {
        if self.node.is_set() {
            return Err(RecordError::Unsupported {
                operation: "set_with_priority".to_string(),
                hint: "the merged set has no priority; prioritize individual records".to_string(),
            }
            .into());
        }
        check_priority(&priority)?;
        self.set(with_priority(value, priority), on_complete)
    }

    pub fn set_priority(&self, priority: Value, on_complete: Option<WriteCallback>) -> Result<()> {
        check_priority(&priority)?;
        Ok(self.node.save_priority(priority, on_complete)?)
    }

    /// Creates a child with a generated, time-ordered key, optionally writing
    /// `value` there.
    ///
    /// Supported at set level (a new record) and on fields of static paths.
    pub fn push(&self, value: Option<Value>, on_complete: Option<WriteCallback>) -> Result<MergedRef> {
        let key = match self.node.kind() {
            RecordKind::Set(set) => set
                .context()
                .paths
                .master()
                .reference()
                .push(None, None)
                .key(),
            RecordKind::Field(field) => match field.target() {
                FieldTarget::Static(reference) => reference.push(None, None).key(),
                FieldTarget::Dynamic { .. } => None,
            },
            RecordKind::Record(_) => None,
        };
        let Some(key) = key else {
            return Err(RecordError::Unsupported {
                operation: "push".to_string(),
                hint: "push new records onto the collection".to_string(),
            }
            .into());
        };
        debug!(location = %self, %key, "pushed merged child");
        let child = self.child(&key);
        match value {
            Some(value) => child.set(value, on_complete)?,
            None => {
                if let Some(on_complete) = on_complete {
                    on_complete(Ok(()));
                }
            }
        }
        Ok(child)
    }

    pub fn set_async(&self, value: Value) -> Result<WriteCompletion> {
        let (callback, completion) = WriteCompletion::channel(self.to_string());
        self.set(value, Some(callback))?;
        Ok(completion)
    }

    pub fn update_async(&self, values: Value) -> Result<WriteCompletion> {
        let (callback, completion) = WriteCompletion::channel(self.to_string());
        self.update(values, Some(callback))?;
        Ok(completion)
    }

    pub fn remove_async(&self) -> Result<WriteCompletion> {
        let (callback, completion) = WriteCompletion::channel(self.to_string());
        self.remove(Some(callback))?;
        Ok(completion)
    }

    /// Transactions cannot be split across paths atomically and are always
    /// rejected.
    pub fn transaction<F>(&self, _update: F) -> Result<()>
    where
        F: Fn(Value) -> Option<Value>,
    {
        Err(RecordError::unsupported("transaction").into())
    }

    /// Disconnect handlers are always rejected.
    pub fn on_disconnect(&self) -> Result<()> {
        Err(RecordError::unsupported("on_disconnect").into())
    }

    /// Authenticates the store of the master path.
    pub fn auth(&self, token: &str) {
        self.node.context().paths.master().reference().auth(token);
    }

    pub fn unauth(&self) {
        self.node.context().paths.master().reference().unauth();
    }

    pub fn go_online(&self) {
        for path in self.node.context().paths.paths() {
            path.reference().go_online();
        }
    }

    pub fn go_offline(&self) {
        for path in self.node.context().paths.paths() {
            path.reference().go_offline();
        }
    }
}
