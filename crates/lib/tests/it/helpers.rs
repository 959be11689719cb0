use std::sync::{Arc, Mutex};

use mergeview::{
    Collection, EventType, MemoryStore, MergedRef, Path,
    backend::BackingRef,
    record::{WriteCallback, WriteResult},
};
use serde_json::{Value, json};

// ==========================
// STORE FIXTURES
// ==========================

/// Writes `value` at `path` directly in the store and delivers the events.
pub fn seed(store: &MemoryStore, path: &str, value: Value) {
    store.reference(path).set(value, None);
    store.flush();
}

/// A store holding three users and their profiles under matching keys.
pub fn users_and_profiles() -> MemoryStore {
    let store = MemoryStore::new();
    seed(
        &store,
        "users",
        json!({
            "alice": {"name": "Alice", "active": true},
            "bob": {"name": "Bob", "active": false},
            "carol": {"name": "Carol", "active": true},
        }),
    );
    seed(
        &store,
        "profiles",
        json!({
            "alice": {"bio": "likes tea"},
            "bob": {"bio": "likes coffee"},
            "carol": {"bio": "likes water"},
        }),
    );
    store
}

/// `users.name`, `users.active` and `profiles.bio` merged by user key.
pub fn merged_users(store: &MemoryStore) -> MergedRef {
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles")),
    ])
    .unwrap();
    collection
        .select("users.name")
        .unwrap()
        .select("users.active")
        .unwrap()
        .select("profiles.bio")
        .unwrap();
    collection.reference().unwrap()
}

/// Like [`merged_users`], keeping only active users.
pub fn active_users(store: &MemoryStore) -> MergedRef {
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles")),
    ])
    .unwrap();
    collection
        .select("users.name")
        .unwrap()
        .select("users.active")
        .unwrap()
        .select("profiles.bio")
        .unwrap()
        .filter(|data, _key, _priority| data.get("active") == Some(&json!(true)))
        .unwrap();
    collection.reference().unwrap()
}

// ==========================
// EVENT RECORDING
// ==========================

/// One delivered event: snapshot key, previous key and plain value.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub key: String,
    pub prev: Option<String>,
    pub value: Value,
}

/// Collects the events delivered to a merged listener.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording `event` on `reference`.
    pub fn listen(&self, reference: &MergedRef, event: EventType) -> mergeview::record::ObserverId {
        let seen = Arc::clone(&self.seen);
        reference.on(event, move |snapshot, prev| {
            seen.lock().unwrap().push(Seen {
                key: snapshot.key(),
                prev: prev.map(str::to_string),
                value: snapshot.val(),
            });
        })
    }

    pub fn take(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    pub fn keys(&self) -> Vec<String> {
        self.take().into_iter().map(|seen| seen.key).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_value(&self) -> Option<Value> {
        self.seen.lock().unwrap().last().map(|seen| seen.value.clone())
    }
}

/// Reads the current merged value of `reference` through a one-off listener.
pub fn read_value(store: &MemoryStore, reference: &MergedRef) -> Value {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    reference.once(EventType::Value, move |snapshot, _| {
        *sink.lock().unwrap() = Some(snapshot.val());
    });
    store.flush();
    let value = seen.lock().unwrap().take();
    value.expect("value event was not delivered")
}

// ==========================
// WRITE COMPLETION
// ==========================

/// A write callback that stores its outcome.
pub fn completion() -> (WriteCallback, Arc<Mutex<Vec<WriteResult>>>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    let callback: WriteCallback = Box::new(move |result| sink.lock().unwrap().push(result));
    (callback, results)
}
