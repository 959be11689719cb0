//! Events synthesized for merged sets, records and fields.

use std::sync::{Arc, Mutex};

use mergeview::{
    Collection, EventType, MemoryStore, MergedRef, Path, backend::BackingRef,
};
use serde_json::json;

use crate::helpers::*;

fn prevs(seen: &[Seen]) -> Vec<(String, Option<String>)> {
    seen.iter()
        .map(|seen| (seen.key.clone(), seen.prev.clone()))
        .collect()
}

fn pair(key: &str, prev: Option<&str>) -> (String, Option<String>) {
    (key.to_string(), prev.map(str::to_string))
}

fn prioritize(store: &MemoryStore, path: &str, priority: f64) {
    store.reference(path).set_priority(json!(priority), None);
    store.flush();
}

#[test]
fn set_value_waits_for_every_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let recorder = Recorder::new();
    recorder.listen(&merged, EventType::Value);
    assert_eq!(recorder.len(), 0);

    store.flush();
    let seen = recorder.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].value.as_object().unwrap().len(), 3);
    assert_eq!(seen[0].value["carol"]["bio"], json!("likes water"));
}

#[test]
fn empty_master_still_reports_a_value() {
    let store = MemoryStore::new();
    let merged = merged_users(&store);

    let recorder = Recorder::new();
    recorder.listen(&merged, EventType::Value);
    store.flush();
    assert_eq!(recorder.last_value(), Some(serde_json::Value::Null));
}

#[test]
fn set_child_added_in_master_order() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let recorder = Recorder::new();
    recorder.listen(&merged, EventType::ChildAdded);
    store.flush();

    let seen = recorder.take();
    assert_eq!(
        prevs(&seen),
        [
            pair("alice", None),
            pair("bob", Some("alice")),
            pair("carol", Some("bob")),
        ]
    );
    assert_eq!(
        seen[1].value,
        json!({"name": "Bob", "active": false, "bio": "likes coffee"})
    );
}

#[test]
fn late_listeners_are_replayed_immediately() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let first = Recorder::new();
    first.listen(&merged, EventType::ChildAdded);
    store.flush();
    assert_eq!(first.len(), 3);

    let second = Recorder::new();
    second.listen(&merged, EventType::ChildAdded);
    assert_eq!(second.keys(), ["alice", "bob", "carol"]);
    assert_eq!(first.len(), 3);
}

#[test]
fn filter_promotes_and_demotes_records() {
    let store = users_and_profiles();
    let merged = active_users(&store);

    let added = Recorder::new();
    let removed = Recorder::new();
    let changed = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    removed.listen(&merged, EventType::ChildRemoved);
    changed.listen(&merged, EventType::ChildChanged);
    store.flush();
    // bob is hidden from the start
    assert_eq!(
        prevs(&added.take()),
        [pair("alice", None), pair("carol", Some("alice"))]
    );

    // bob now passes the filter and lands between alice and carol
    seed(&store, "users/bob/active", json!(true));
    assert_eq!(prevs(&added.take()), [pair("bob", Some("alice"))]);
    assert!(removed.take().is_empty());
    assert!(changed.take().is_empty());

    seed(&store, "users/alice/active", json!(false));
    let seen = removed.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "alice");
    assert_eq!(seen[0].value["active"], json!(true));
    assert!(added.take().is_empty());
    assert!(changed.take().is_empty());

    // a promoted record is demoted like any other
    seed(&store, "users/bob/active", json!(false));
    assert_eq!(removed.keys(), ["bob"]);
    assert!(added.take().is_empty());
    assert!(changed.take().is_empty());

    // visible records still report changes
    seed(&store, "users/carol/name", json!("Caroline"));
    assert_eq!(changed.keys(), ["carol"]);
}

#[test]
fn records_are_added_at_most_once() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let added = Recorder::new();
    let changed = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    changed.listen(&merged, EventType::ChildChanged);
    store.flush();
    assert_eq!(added.take().len(), 3);

    seed(&store, "profiles/carol/bio", json!("likes juice"));
    seed(&store, "users/carol/name", json!("Caroline"));
    assert!(added.take().is_empty());

    let seen = changed.take();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|seen| seen.key == "carol"));
    assert_eq!(
        seen[1].value,
        json!({"name": "Caroline", "active": true, "bio": "likes juice"})
    );
}

#[test]
fn removing_the_master_entry_removes_the_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let removed = Recorder::new();
    let values = Recorder::new();
    removed.listen(&merged, EventType::ChildRemoved);
    values.listen(&merged, EventType::Value);
    store.flush();
    values.take();

    store.reference("users/carol").remove(None);
    store.flush();

    let seen = removed.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "carol");
    assert_eq!(seen[0].value["name"], json!("Carol"));
    let value = values.last_value().unwrap();
    assert!(value.get("carol").is_none());
    assert_eq!(value.as_object().unwrap().len(), 2);
}

#[test]
fn records_added_later_are_reported() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let added = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    store.flush();
    added.take();

    seed(&store, "profiles/dave", json!({"bio": "new here"}));
    assert!(added.take().is_empty());

    seed(&store, "users/dave", json!({"name": "Dave", "active": true}));
    let seen = added.take();
    assert_eq!(prevs(&seen), [pair("dave", Some("carol"))]);
    assert_eq!(seen[0].value["bio"], json!("new here"));
}

#[test]
fn moved_record_without_predecessor_goes_first() {
    let store = users_and_profiles();
    prioritize(&store, "users/alice", 1.0);
    prioritize(&store, "users/bob", 2.0);
    prioritize(&store, "users/carol", 3.0);
    let merged = merged_users(&store).order_by_priority().unwrap();

    let added = Recorder::new();
    let moved = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    moved.listen(&merged, EventType::ChildMoved);
    store.flush();
    assert_eq!(added.keys(), ["alice", "bob", "carol"]);

    prioritize(&store, "users/carol", 0.0);
    assert_eq!(prevs(&moved.take()), [pair("carol", None)]);

    let value = read_value(&store, &merged);
    assert_eq!(value.as_object().unwrap().len(), 3);
}

#[test]
fn moved_record_follows_nearest_visible_predecessor() {
    let store = users_and_profiles();
    seed(&store, "users/dave", json!({"name": "Dave", "active": true}));
    prioritize(&store, "users/alice", 1.0);
    prioritize(&store, "users/bob", 2.0);
    prioritize(&store, "users/carol", 3.0);
    prioritize(&store, "users/dave", 4.0);
    let merged = active_users(&store).order_by_priority().unwrap();

    let added = Recorder::new();
    let moved = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    moved.listen(&merged, EventType::ChildMoved);
    store.flush();
    assert_eq!(
        prevs(&added.take()),
        [
            pair("alice", None),
            pair("carol", Some("alice")),
            pair("dave", Some("carol")),
        ]
    );

    // dave now sorts right after the hidden bob
    prioritize(&store, "users/dave", 2.5);
    assert_eq!(prevs(&moved.take()), [pair("dave", Some("alice"))]);
}

#[test]
fn record_child_events_are_keyed_by_alias() {
    let store = users_and_profiles();
    let merged = merged_users(&store);
    let alice = merged.child("alice");

    let added = Recorder::new();
    let removed = Recorder::new();
    let changed = Recorder::new();
    added.listen(&alice, EventType::ChildAdded);
    removed.listen(&alice, EventType::ChildRemoved);
    changed.listen(&alice, EventType::ChildChanged);
    store.flush();
    assert_eq!(
        prevs(&added.take()),
        [
            pair("name", None),
            pair("active", Some("name")),
            pair("bio", Some("active")),
        ]
    );

    seed(&store, "users/alice/name", json!("Alicia"));
    let seen = changed.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "name");
    assert_eq!(seen[0].value, json!("Alicia"));

    store.reference("profiles/alice/bio").remove(None);
    store.flush();
    let seen = removed.take();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "bio");
    assert_eq!(seen[0].value, json!("likes tea"));
}

#[test]
fn unchanged_record_values_are_not_repeated() {
    let store = users_and_profiles();
    let merged = merged_users(&store);
    let alice = merged.child("alice");

    let values = Recorder::new();
    values.listen(&alice, EventType::Value);
    store.flush();
    assert_eq!(values.len(), 1);

    // not a selected field, so the merged value stays the same
    seed(&store, "users/alice/email", json!("alice@example.com"));
    assert_eq!(values.len(), 1);

    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(values.len(), 2);
}

#[test]
fn dynamic_field_follows_its_record() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice", "profileId": "p1"}));
    seed(
        &store,
        "profiles",
        json!({"p1": {"bio": "first"}, "p2": {"bio": "second"}}),
    );
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
    let merged = collection.reference().unwrap();
    let bio = merged.child("alice/bio");

    let values = Recorder::new();
    values.listen(&bio, EventType::Value);
    store.flush();
    assert_eq!(values.last_value(), Some(json!("first")));

    seed(&store, "users/alice/profileId", json!("p2"));
    assert_eq!(values.last_value(), Some(json!("second")));
    assert_eq!(values.len(), 2);
}

#[test]
fn read_denial_cancels_merged_listeners() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let cancelled = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&cancelled);
    let values = Arc::new(Mutex::new(0));
    let count = Arc::clone(&values);
    merged.on_with_cancel(
        EventType::Value,
        move |_, _| *count.lock().unwrap() += 1,
        move |err| sink.lock().unwrap().push(err.clone()),
    );
    store.flush();
    assert_eq!(*values.lock().unwrap(), 1);

    store.deny_read("profiles");
    store.flush();

    let cancelled = cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0].is_permission_denied());
    assert_eq!(store.listener_count(), 0);

    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(*values.lock().unwrap(), 1);
}

#[test]
fn off_releases_backing_listeners() {
    let store = users_and_profiles();
    let merged: MergedRef = merged_users(&store);

    let values = Recorder::new();
    let added = Recorder::new();
    let id = values.listen(&merged, EventType::Value);
    added.listen(&merged, EventType::ChildAdded);
    store.flush();
    assert!(store.listener_count() > 0);

    merged.off(Some(EventType::Value), Some(id));
    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(values.len(), 1);
    assert!(store.listener_count() > 0);

    merged.off(None, None);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn listeners_outlive_the_reference_they_were_added_through() {
    let store = users_and_profiles();

    let record = Recorder::new();
    record.listen(&merged_users(&store).child("alice"), EventType::Value);
    let set = Recorder::new();
    set.listen(&merged_users(&store), EventType::ChildAdded);
    store.flush();
    assert_eq!(record.last_value().unwrap()["bio"], json!("likes tea"));
    assert_eq!(set.keys(), ["alice", "bob", "carol"]);

    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(record.len(), 2);
    assert_eq!(record.last_value().unwrap()["name"], json!("Alicia"));
}

#[test]
fn references_to_one_location_share_listeners() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let values = Recorder::new();
    values.listen(&merged.child("alice"), EventType::Value);
    store.flush();
    assert_eq!(values.len(), 1);
    assert_eq!(merged.child("alice").listener_count(EventType::Value), 1);

    merged.child("alice").off(None, None);
    assert_eq!(merged.child("alice").listener_count(EventType::Value), 0);
    assert_eq!(store.listener_count(), 0);

    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(values.len(), 1);
}

#[test]
fn off_deactivates_the_event() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let first = Recorder::new();
    let second = Recorder::new();
    let id = first.listen(&merged, EventType::Value);
    second.listen(&merged, EventType::Value);
    store.flush();
    assert_eq!(merged.listener_count(EventType::Value), 2);
    assert_eq!(merged.listener_count(EventType::ChildAdded), 0);

    merged.off(Some(EventType::Value), Some(id));
    assert_eq!(merged.listener_count(EventType::Value), 1);
    assert!(store.listener_count() > 0);

    merged.off(Some(EventType::Value), None);
    assert_eq!(merged.listener_count(EventType::Value), 0);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn clearing_a_record_keeps_the_set_tracking_it() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let added = Recorder::new();
    let changed = Recorder::new();
    added.listen(&merged, EventType::ChildAdded);
    changed.listen(&merged, EventType::ChildChanged);
    store.flush();
    assert_eq!(added.take().len(), 3);

    let alice = merged.child("alice");
    let values = Recorder::new();
    values.listen(&alice, EventType::Value);
    assert_eq!(values.len(), 1);

    alice.off(None, None);
    assert_eq!(alice.listener_count(EventType::Value), 2);

    seed(&store, "users/alice/name", json!("Alicia"));
    assert_eq!(changed.keys(), ["alice"]);
    assert_eq!(values.len(), 1);
}
