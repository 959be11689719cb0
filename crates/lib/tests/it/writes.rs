//! Splitting merged writes across the underlying paths.

use mergeview::{Collection, MemoryStore, MergedRef, Path, constants::PRIORITY_KEY};
use serde_json::{Value, json};

use crate::helpers::*;

/// Four paths, one selected field each.
fn four_paths(store: &MemoryStore) -> MergedRef {
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles")),
        Path::new(store.reference("settings")),
        Path::new(store.reference("stats")),
    ])
    .unwrap();
    collection
        .select("users.name")
        .unwrap()
        .select("profiles.bio")
        .unwrap()
        .select("settings.theme")
        .unwrap()
        .select("stats.visits")
        .unwrap();
    collection.reference().unwrap()
}

fn linked_profiles(store: &MemoryStore) -> MergedRef {
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
fn record_writes_round_trip() {
    let store = MemoryStore::new();
    let merged = merged_users(&store);
    let written = json!({"name": "Dave", "active": true, "bio": "new here"});

    merged.child("dave").set(written.clone(), None).unwrap();
    store.flush();

    assert_eq!(
        store.value("users/dave"),
        json!({"name": "Dave", "active": true})
    );
    assert_eq!(store.value("profiles/dave"), json!({"bio": "new here"}));
    assert_eq!(read_value(&store, &merged.child("dave")), written);
}

#[test]
fn set_clears_selected_fields_it_omits() {
    let store = users_and_profiles();
    seed(&store, "users/alice/email", json!("alice@example.com"));
    let merged = merged_users(&store);

    merged.child("alice").set(json!({"name": "Al"}), None).unwrap();
    store.flush();

    assert_eq!(
        store.value("users/alice"),
        json!({"name": "Al", "email": "alice@example.com"})
    );
    assert_eq!(store.value("profiles/alice"), Value::Null);
}

#[test]
fn update_touches_only_the_given_fields() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    merged
        .child("alice")
        .update(json!({"bio": "likes cocoa"}), None)
        .unwrap();
    store.flush();

    assert_eq!(
        store.value("users/alice"),
        json!({"name": "Alice", "active": true})
    );
    assert_eq!(store.value("profiles/alice"), json!({"bio": "likes cocoa"}));
}

#[test]
fn one_failing_path_reports_one_error() {
    let store = MemoryStore::new();
    let merged = four_paths(&store);
    store.fail_next_write("settings/alice");

    let (callback, results) = completion();
    merged
        .child("alice")
        .set(
            json!({"name": "Alice", "bio": "hi", "theme": "dark", "visits": 3}),
            Some(callback),
        )
        .unwrap();
    assert!(results.lock().unwrap().is_empty());
    store.flush();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let errors = results[0].as_ref().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].module(), "backend");

    assert_eq!(store.value("users/alice"), json!({"name": "Alice"}));
    assert_eq!(store.value("profiles/alice"), json!({"bio": "hi"}));
    assert_eq!(store.value("settings/alice"), Value::Null);
    assert_eq!(store.value("stats/alice"), json!({"visits": 3}));
}

#[test]
fn successful_fan_out_completes_once() {
    let store = MemoryStore::new();
    let merged = four_paths(&store);

    let (callback, results) = completion();
    merged
        .child("alice")
        .set(
            json!({"name": "Alice", "bio": "hi", "theme": "dark", "visits": 3}),
            Some(callback),
        )
        .unwrap();
    store.flush();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
}

#[test]
fn denied_path_fails_the_write() {
    let store = users_and_profiles();
    let merged = merged_users(&store);
    store.deny_write("profiles");

    let (callback, results) = completion();
    merged
        .child("alice")
        .update(json!({"name": "Al", "bio": "nope"}), Some(callback))
        .unwrap();
    store.flush();

    let results = results.lock().unwrap();
    let errors = results[0].as_ref().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_permission_denied());
    assert_eq!(store.value("users/alice/name"), json!("Al"));
    assert_eq!(store.value("profiles/alice/bio"), json!("likes tea"));
}

#[test]
fn primitives_cannot_be_split() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let err = merged.child("alice").set(json!(5), None).unwrap_err();
    assert!(err.is_write_shape_error());

    let err = merged.set(json!("everything"), None).unwrap_err();
    assert!(err.is_write_shape_error());

    let err = merged.child("alice").update(json!([1, 2]), None).unwrap_err();
    assert!(err.is_write_shape_error());
    assert_eq!(store.pending_tasks(), 0);
}

#[test]
fn single_value_field_accepts_primitives() {
    let store = MemoryStore::new();
    let mut collection = Collection::new([Path::new(store.reference("scores"))]).unwrap();
    collection.select(("scores.$value", "score")).unwrap();
    let merged = collection.reference().unwrap();

    merged.child("alice").set(json!(42), None).unwrap();
    store.flush();
    assert_eq!(store.value("scores/alice"), json!(42));
}

#[test]
fn key_fields_are_read_only() {
    let store = users_and_profiles();
    let mut collection = Collection::new([Path::new(store.reference("users"))]).unwrap();
    collection
        .select(("users.$key", "id"))
        .unwrap()
        .select("users.name")
        .unwrap();
    let merged = collection.reference().unwrap();

    let err = merged
        .child("alice")
        .child("id")
        .set(json!("mallory"), None)
        .unwrap_err();
    assert!(err.is_unsupported());

    // writing a whole record ignores the derived key
    merged
        .child("alice")
        .update(json!({"id": "mallory", "name": "Al"}), None)
        .unwrap();
    store.flush();
    assert_eq!(
        store.value("users/alice"),
        json!({"name": "Al", "active": true})
    );
}

#[test]
fn dependent_path_is_written_under_the_written_key() {
    let store = MemoryStore::new();
    let merged = linked_profiles(&store);

    merged
        .child("alice")
        .set(json!({"name": "Alice", "profileId": "p9", "bio": "linked"}), None)
        .unwrap();
    store.flush();

    assert_eq!(
        store.value("users/alice"),
        json!({"name": "Alice", "profileId": "p9"})
    );
    assert_eq!(store.value("profiles/p9"), json!({"bio": "linked"}));
    assert_eq!(store.value("profiles/alice"), Value::Null);
}

#[test]
fn dependent_field_writes_resolve_their_location() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice", "profileId": "p1"}));
    seed(&store, "profiles/p1", json!({"bio": "first"}));
    let merged = linked_profiles(&store);

    let (callback, results) = completion();
    merged
        .child("alice/bio")
        .set(json!("rewritten"), Some(callback))
        .unwrap();
    store.flush();

    assert!(results.lock().unwrap()[0].is_ok());
    assert_eq!(store.value("profiles/p1/bio"), json!("rewritten"));
}

#[test]
fn set_level_writes_fan_out_per_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    merged
        .update(
            json!({
                "dave": {"name": "Dave", "active": true, "bio": "new"},
                "alice": {"bio": "changed"},
            }),
            None,
        )
        .unwrap();
    store.flush();

    assert_eq!(store.value("users/dave/name"), json!("Dave"));
    assert_eq!(store.value("profiles/dave/bio"), json!("new"));
    assert_eq!(store.value("profiles/alice/bio"), json!("changed"));
    assert_eq!(store.value("users/bob/name"), json!("Bob"));
}

#[test]
fn set_level_fan_out_reports_the_one_failed_write() {
    let store = MemoryStore::new();
    let merged = merged_users(&store);
    store.fail_next_write("profiles/r2");

    let (callback, results) = completion();
    merged
        .set(
            json!({
                "r1": {"name": "One", "active": true, "bio": "x"},
                "r2": {"name": "Two", "active": false, "bio": "y"},
            }),
            Some(callback),
        )
        .unwrap();
    store.flush();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let errors = results[0].as_ref().unwrap_err();
    assert_eq!(errors.len(), 1);

    assert_eq!(store.value("profiles"), json!({"r1": {"bio": "x"}}));
    assert_eq!(
        store.value("users"),
        json!({
            "r1": {"name": "One", "active": true},
            "r2": {"name": "Two", "active": false},
        })
    );
}

#[test]
fn removing_the_set_clears_every_path() {
    let store = users_and_profiles();
    seed(&store, "profiles/zed", json!({"bio": "no user"}));
    let merged = merged_users(&store);

    let (callback, results) = completion();
    merged.remove(Some(callback)).unwrap();
    store.flush();

    assert!(results.lock().unwrap()[0].is_ok());
    assert_eq!(store.value("users"), Value::Null);
    assert_eq!(store.value("profiles"), json!({"zed": {"bio": "no user"}}));
}

#[test]
fn priorities_live_on_the_master_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    merged.child("alice").set_priority(json!(5), None).unwrap();
    store.flush();
    assert_eq!(store.export_value("users/alice")[PRIORITY_KEY], json!(5));
    assert!(store.export_value("profiles/alice").get(PRIORITY_KEY).is_none());

    merged
        .child("bob")
        .set_with_priority(
            json!({"name": "Bob", "active": true, "bio": "b"}),
            json!("b-first"),
            None,
        )
        .unwrap();
    store.flush();
    assert_eq!(store.export_value("users/bob")[PRIORITY_KEY], json!("b-first"));

    assert!(merged.set_priority(json!(1), None).unwrap_err().is_unsupported());
    assert!(
        merged
            .set_with_priority(json!({}), json!(1), None)
            .unwrap_err()
            .is_unsupported()
    );
    assert!(
        merged
            .child("alice")
            .set_priority(json!({"not": "valid"}), None)
            .is_err()
    );
}
