//! The rest of the MergedRef surface: navigation, push, queries, sessions and
//! async completions.

use mergeview::{EventType, MemoryStore, backend::QueryOp};
use serde_json::{Value, json};

use crate::helpers::*;

#[test]
fn navigation_between_levels() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let bio = merged.child("alice/bio");
    assert_eq!(bio.key(), "bio");
    let alice = bio.parent().unwrap();
    assert_eq!(alice.key(), "alice");
    assert!(alice.parent().unwrap().parent().is_none());
    assert_eq!(bio.root().key(), merged.key());

    assert_eq!(alice.to_string(), format!("{alice}"));
    assert!(alice.to_string().contains("users/alice"));
    assert!(alice.to_string().contains("profiles/alice"));
    assert!(format!("{bio:?}").starts_with("MergedRef"));
}

#[test]
fn push_creates_a_new_record() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let (callback, results) = completion();
    let pushed = merged
        .push(
            Some(json!({"name": "Pushed", "active": true, "bio": "fresh"})),
            Some(callback),
        )
        .unwrap();
    store.flush();

    assert!(results.lock().unwrap()[0].is_ok());
    let key = pushed.key();
    assert_eq!(key.len(), 20);
    assert_eq!(store.value(&format!("users/{key}/name")), json!("Pushed"));
    assert_eq!(store.value(&format!("profiles/{key}/bio")), json!("fresh"));

    let second = merged.push(None, None).unwrap();
    assert!(second.key() > key);
}

#[test]
fn push_below_a_static_field() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let tag = merged
        .child("alice/tags")
        .push(Some(json!("tea")), None)
        .unwrap();
    store.flush();
    assert_eq!(
        store.value(&format!("users/alice/tags/{}", tag.key())),
        json!("tea")
    );

    let err = merged.child("alice").push(None, None).unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn queries_apply_to_the_master_and_static_fields() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let first_two = merged.order_by_key().unwrap().limit_to_first(2).unwrap();
    let value = read_value(&store, &first_two);
    let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["alice", "bob"]);

    let last = merged.limit_to_last(1).unwrap();
    let recorder = Recorder::new();
    recorder.listen(&last, EventType::ChildAdded);
    store.flush();
    assert_eq!(recorder.keys(), ["carol"]);

    seed(&store, "users/alice/tags", json!({"a": 1, "b": 2, "c": 3}));
    let tags = merged
        .child("alice/tags")
        .order_by_value()
        .unwrap()
        .start_at(json!(2), None)
        .unwrap();
    assert_eq!(read_value(&store, &tags), json!({"b": 2, "c": 3}));

    assert!(merged.child("alice").query(QueryOp::OrderByKey).unwrap_err().is_unsupported());
}

#[test]
fn transactions_and_disconnect_handlers_are_rejected() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let err = merged
        .child("alice")
        .transaction(|current: Value| Some(current))
        .unwrap_err();
    assert!(err.is_unsupported());
    assert!(merged.on_disconnect().unwrap_err().is_unsupported());
}

#[test]
fn session_calls_reach_the_backing_store() {
    let store = MemoryStore::new();
    let merged = merged_users(&store);

    merged.auth("secret");
    assert_eq!(store.session().token.as_deref(), Some("secret"));
    merged.unauth();
    assert_eq!(store.session().token, None);

    merged.go_offline();
    assert!(!store.session().online);
    merged.child("alice").go_online();
    assert!(store.session().online);
}

#[tokio::test]
async fn async_writes_resolve_after_delivery() {
    let store = users_and_profiles();
    let merged = merged_users(&store);

    let done = merged
        .child("dave")
        .set_async(json!({"name": "Dave", "active": true, "bio": "async"}))
        .unwrap();
    store.flush();
    assert!(done.wait().await.is_ok());
    assert_eq!(store.value("profiles/dave/bio"), json!("async"));

    let done = merged
        .child("dave")
        .update_async(json!({"bio": "updated"}))
        .unwrap();
    store.flush();
    assert!(done.wait().await.is_ok());
    assert_eq!(store.value("profiles/dave/bio"), json!("updated"));

    let done = merged.child("dave").remove_async().unwrap();
    store.flush();
    assert!(done.wait().await.is_ok());
    assert_eq!(store.value("users/dave"), Value::Null);
    assert_eq!(store.value("profiles/dave"), Value::Null);
}

#[tokio::test]
async fn async_write_failures_carry_every_error() {
    let store = users_and_profiles();
    let merged = merged_users(&store);
    store.deny_write("users");
    store.deny_write("profiles");

    let done = merged
        .child("alice")
        .update_async(json!({"name": "Al", "bio": "nope"}))
        .unwrap();
    store.flush();
    let errors = done.wait().await.unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|err| err.is_permission_denied()));
}
