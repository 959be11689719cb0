//! The in-memory store behind the merged views.

use std::sync::{Arc, Mutex};

use mergeview::{
    EventType, MemoryStore,
    backend::{BackendError, BackingRef, CancelCallback},
    data::DataSnapshot,
};
use serde_json::{Value, json};
use tempfile::tempdir;

use crate::helpers::*;

#[test]
fn merged_view_over_a_reloaded_store() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("store.json");

    let store = users_and_profiles();
    store.reference("users/bob").set_priority(json!(3), None);
    store.flush();
    store.save_to_file(&file).unwrap();

    let reloaded = MemoryStore::load_from_file(&file).unwrap();
    assert_eq!(reloaded.export_value("users/bob"), store.export_value("users/bob"));

    let merged = merged_users(&reloaded);
    assert_eq!(
        read_value(&reloaded, &merged.child("alice")),
        json!({"name": "Alice", "active": true, "bio": "likes tea"})
    );
}

#[test]
fn missing_file_loads_an_empty_store() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::load_from_file(dir.path().join("absent.json")).unwrap();
    assert_eq!(store.value(""), Value::Null);
}

#[test]
fn corrupt_file_is_a_serialization_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("store.json");
    std::fs::write(&file, "{ not json").unwrap();

    let err = MemoryStore::load_from_file(&file).unwrap_err();
    assert_eq!(err.module(), "serialize");
}

#[test]
fn listeners_on_denied_locations_are_cancelled() {
    let store = users_and_profiles();
    store.deny_read("profiles/alice");

    let cancelled: Arc<Mutex<Vec<BackendError>>> = Arc::new(Mutex::new(Vec::new()));
    let delivered = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&cancelled);
    let count = Arc::clone(&delivered);
    let cancel: CancelCallback = Arc::new(move |err: &BackendError| {
        sink.lock().unwrap().push(err.clone());
    });
    store.reference("profiles/alice").on(
        EventType::Value,
        Arc::new(move |_: &DataSnapshot, _: Option<&str>| {
            *count.lock().unwrap() += 1;
        }),
        Some(cancel),
    );
    store.flush();

    assert_eq!(cancelled.lock().unwrap().len(), 1);
    assert!(cancelled.lock().unwrap()[0].is_permission_denied());
    assert_eq!(*delivered.lock().unwrap(), 0);
    assert_eq!(store.listener_count(), 0);

    store.allow_read("profiles/alice");
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    store.reference("profiles/alice").once(
        EventType::Value,
        Arc::new(move |snapshot: &DataSnapshot, _: Option<&str>| {
            *sink.lock().unwrap() = Some(snapshot.val())
        }),
        None,
    );
    store.flush();
    assert_eq!(*seen.lock().unwrap(), Some(json!({"bio": "likes tea"})));
}

#[test]
fn merged_record_over_a_denied_path_is_cancelled() {
    let store = users_and_profiles();
    store.deny_read("profiles");
    let merged = merged_users(&store);
    let alice = merged.child("alice");

    let cancelled = Arc::new(Mutex::new(0));
    let count = Arc::clone(&cancelled);
    alice.on_with_cancel(
        EventType::Value,
        |_, _| panic!("record should not load"),
        move |err| {
            assert!(err.is_permission_denied());
            *count.lock().unwrap() += 1;
        },
    );
    store.flush();

    assert_eq!(*cancelled.lock().unwrap(), 1);
    assert_eq!(store.listener_count(), 0);
}
