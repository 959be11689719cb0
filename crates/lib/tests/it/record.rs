//! Reading merged records, fields and joined paths.

use mergeview::{
    Collection, EventType, MemoryStore, Path, backend::BackingRef, constants::PRIORITY_KEY,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use crate::helpers::*;

/// Users whose profile key is stored in `users/<id>/profileId`.
fn users_with_linked_profiles(store: &MemoryStore) -> mergeview::MergedRef {
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles"))
            .depends_on("users.profileId")
            .unwrap(),
    ])
    .unwrap();
    collection
        .select("users.name")
        .unwrap()
        .select("users.profileId")
        .unwrap()
        .select("profiles.bio")
        .unwrap();
    collection.reference().unwrap()
}

#[test]
fn set_value_merges_every_visible_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    assert_eq!(
        read_value(&store, &merged),
        json!({
            "alice": {"name": "Alice", "active": true, "bio": "likes tea"},
            "bob": {"name": "Bob", "active": false, "bio": "likes coffee"},
            "carol": {"name": "Carol", "active": true, "bio": "likes water"},
        })
    );
}

#[test]
fn filter_hides_rejected_records() {
    let store = users_and_profiles();
    let merged = active_users(&store);

    let value = read_value(&store, &merged);
    let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["alice", "carol"]);
}

#[test]
fn record_without_master_entry_is_null() {
    let store = users_and_profiles();
    seed(&store, "profiles/dave", json!({"bio": "orphan"}));
    let merged = merged_users(&store);

    assert_eq!(read_value(&store, &merged.child("dave")), Value::Null);
    let set = read_value(&store, &merged);
    assert!(set.get("dave").is_none());
}

#[test]
fn unselected_data_is_not_merged() {
    let store = users_and_profiles();
    seed(&store, "users/alice/email", json!("alice@example.com"));
    seed(&store, "profiles/alice/avatar", json!("tea.png"));
    let merged = merged_users(&store);

    assert_eq!(
        read_value(&store, &merged.child("alice")),
        json!({"name": "Alice", "active": true, "bio": "likes tea"})
    );
}

#[test]
fn fields_read_from_their_own_path() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let alice = merged.child("alice");
    assert_eq!(read_value(&store, &alice.child("bio")), json!("likes tea"));
    assert_eq!(read_value(&store, &alice.child("name")), json!("Alice"));
    assert_eq!(alice.child("bio").key(), "bio");
    assert_eq!(alice.child("bio").parent().unwrap().key(), "alice");
    assert_eq!(alice.child("bio").root().key(), "[users][profiles]");
}

#[test]
fn key_and_value_fields() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice"}));
    seed(&store, "scores/alice", json!(42));

    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("scores")),
    ])
    .unwrap();
    collection
        .select(("users.$key", "id"))
        .unwrap()
        .select("users.name")
        .unwrap()
        .select(("scores.$value", "score"))
        .unwrap();
    let merged = collection.reference().unwrap();

    assert_eq!(
        read_value(&store, &merged.child("alice")),
        json!({"id": "alice", "name": "Alice", "score": 42})
    );
}

#[test]
fn snapshots_expose_their_children() {
    let store = users_and_profiles();
    store.reference("users/alice").set_priority(json!(7), None);
    store.flush();
    let merged = merged_users(&store);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    merged.child("alice").once(EventType::Value, move |snapshot, _| {
        *sink.lock().unwrap() = Some(snapshot.clone());
    });
    store.flush();
    let snapshot = seen.lock().unwrap().take().unwrap();

    assert!(snapshot.exists());
    assert_eq!(snapshot.key(), "alice");
    assert_eq!(snapshot.priority(), json!(7));
    assert_eq!(snapshot.export_val()[PRIORITY_KEY], json!(7));
    assert_eq!(snapshot.child_keys(), ["name", "active", "bio"]);
    assert_eq!(snapshot.num_children(), 3);
    assert!(snapshot.has_child("bio"));
    assert!(!snapshot.has_child("email"));
    assert_eq!(snapshot.child("bio").val(), json!("likes tea"));
    assert_eq!(snapshot.reference().key(), "alice");
    assert!(snapshot.raw().get("profiles").is_some());
}

#[test]
fn dependent_paths_are_joined_by_field_value() {
    let store = MemoryStore::new();
    seed(
        &store,
        "users",
        json!({
            "alice": {"name": "Alice", "profileId": "p1"},
            "bob": {"name": "Bob", "profileId": "p2"},
        }),
    );
    seed(
        &store,
        "profiles",
        json!({"p1": {"bio": "first"}, "p2": {"bio": "second"}}),
    );
    let merged = users_with_linked_profiles(&store);

    assert_eq!(
        read_value(&store, &merged),
        json!({
            "alice": {"name": "Alice", "profileId": "p1", "bio": "first"},
            "bob": {"name": "Bob", "profileId": "p2", "bio": "second"},
        })
    );
    assert_eq!(
        read_value(&store, &merged.child("bob").child("bio")),
        json!("second")
    );
}

#[test]
fn missing_dependency_key_leaves_fields_out() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice"}));
    seed(&store, "profiles/p1", json!({"bio": "first"}));
    let merged = users_with_linked_profiles(&store);

    assert_eq!(
        read_value(&store, &merged.child("alice")),
        json!({"name": "Alice"})
    );
}

#[test]
fn records_follow_dependency_changes() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice", "profileId": "p1"}));
    seed(
        &store,
        "profiles",
        json!({"p1": {"bio": "first"}, "p2": {"bio": "second"}}),
    );
    let merged = users_with_linked_profiles(&store);

    let alice = merged.child("alice");
    let recorder = Recorder::new();
    recorder.listen(&alice, EventType::Value);
    store.flush();
    assert_eq!(
        recorder.last_value(),
        Some(json!({"name": "Alice", "profileId": "p1", "bio": "first"}))
    );

    seed(&store, "users/alice/profileId", json!("p2"));
    assert_eq!(
        recorder.last_value(),
        Some(json!({"name": "Alice", "profileId": "p2", "bio": "second"}))
    );

    // The old profile is no longer part of the record.
    let before = recorder.len();
    seed(&store, "profiles/p1/bio", json!("rewritten"));
    assert_eq!(recorder.len(), before);

    seed(&store, "profiles/p2/bio", json!("updated"));
    assert_eq!(
        recorder.last_value(),
        Some(json!({"name": "Alice", "profileId": "p2", "bio": "updated"}))
    );
}
