//! Declaring collections: path validation, field selection and configuration.

use mergeview::{
    Collection, MemoryStore, MergeConfig, Path,
    collection::{CollectionError, TieBreak},
};
use serde_json::json;

use crate::helpers::*;

#[test]
fn rejects_dependency_cycles() {
    let store = MemoryStore::new();
    let err = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("accounts"))
            .depends_on("settings.accountId")
            .unwrap(),
        Path::new(store.reference("settings"))
            .depends_on("accounts.settingsId")
            .unwrap(),
    ])
    .unwrap_err();

    assert!(err.is_cycle());
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("accounts.settingsId"));
}

#[test]
fn rejects_invalid_path_declarations() {
    let store = MemoryStore::new();

    assert!(matches!(
        Collection::new(Vec::<Path>::new()),
        Err(mergeview::Error::Collection(CollectionError::NoPaths))
    ));

    let err = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("users")).alias("again"),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        mergeview::Error::Collection(CollectionError::DuplicatePathUrl { .. })
    ));

    let err = Collection::new([Path::new(store.reference("users"))
        .depends_on("profiles.userId")
        .unwrap()])
    .unwrap_err();
    assert!(matches!(
        err,
        mergeview::Error::Collection(CollectionError::MasterDependency { .. })
    ));

    let err = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles"))
            .depends_on("accounts.profileId")
            .unwrap(),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        mergeview::Error::Collection(CollectionError::UnknownPath { .. })
    ));
}

#[test]
fn dependency_field_must_be_selected_first() {
    let store = MemoryStore::new();
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles"))
            .depends_on("users.profileId")
            .unwrap(),
    ])
    .unwrap();

    let err = collection.select("profiles.bio").unwrap_err();
    assert!(matches!(
        err,
        mergeview::Error::Collection(CollectionError::UnresolvedDependencyField { .. })
    ));

    collection.select("users.profileId").unwrap();
    collection.select("profiles.bio").unwrap();
    assert_eq!(collection.fields().len(), 2);
}

#[test]
fn field_aliases_must_not_collide() {
    let store = MemoryStore::new();
    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("profiles")),
    ])
    .unwrap();
    collection.select("users.name").unwrap();

    assert!(matches!(
        collection.select("profiles.name").unwrap_err(),
        mergeview::Error::Collection(CollectionError::DuplicateFieldAlias { .. })
    ));

    collection.select(("profiles.first", "full.first")).unwrap();
    assert!(matches!(
        collection.select(("profiles.whole", "full")).unwrap_err(),
        mergeview::Error::Collection(CollectionError::ConflictingFieldAlias { .. })
    ));
    assert!(collection.select("users").is_err());
}

#[test]
fn collection_is_frozen_once_referenced() {
    let store = MemoryStore::new();
    let mut collection = Collection::new([Path::new(store.reference("users"))]).unwrap();
    assert!(matches!(
        collection.reference().unwrap_err(),
        mergeview::Error::Collection(CollectionError::NoFields)
    ));

    collection.select("users.name").unwrap();
    let merged = collection.reference().unwrap();
    assert_eq!(merged.key(), "users");

    let err = collection.select("users.email").unwrap_err();
    assert!(matches!(
        err,
        mergeview::Error::Collection(CollectionError::Finalized { .. })
    ));
    assert!(collection.filter(|_, _, _| true).is_err());
}

#[test]
fn set_key_names_every_path() {
    let store = users_and_profiles();
    let merged = merged_users(&store);
    assert_eq!(merged.key(), "[users][profiles]");
    assert!(merged.parent().is_none());
    assert!(merged.to_string().contains("profiles"));
}

#[test]
fn nested_aliases_and_config() {
    let store = MemoryStore::new();
    seed(&store, "users/alice", json!({"name": "Alice"}));
    seed(&store, "nicknames/alice", json!({"name": "Ali"}));

    let mut collection = Collection::new([
        Path::new(store.reference("users")),
        Path::new(store.reference("nicknames")),
    ])
    .unwrap()
    .with_config(MergeConfig::default());
    collection
        .select("users.name")
        .unwrap()
        .select(("nicknames.name", "nick.name"))
        .unwrap();
    let merged = collection.reference().unwrap();
    assert_eq!(
        read_value(&store, &merged.child("alice")),
        json!({"name": "Alice", "nick": {"name": "Ali"}})
    );

    let config = MergeConfig::from_json(r#"{"tie_break": "latest_declared"}"#).unwrap();
    assert_eq!(config.tie_break, TieBreak::LatestDeclared);
    assert!(MergeConfig::from_json("[1, 2]").is_err());
}
