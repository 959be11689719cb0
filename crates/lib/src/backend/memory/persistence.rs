//! Persistence operations for the memory store
//!
//! The stored tree is written to and read from a JSON file.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::MemoryStore;
use crate::Result;
use crate::data::normalize;

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Serialize, Deserialize)]
struct SerializableStore {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    #[serde(default)]
    data: Value,
}

pub(super) fn save_to_file<P: AsRef<Path>>(store: &MemoryStore, path: P) -> Result<()> {
    let data = store.inner.data.read().unwrap().clone();
    let serializable = SerializableStore {
        version: PERSISTENCE_VERSION,
        data,
    };
    let json = serde_json::to_string_pretty(&serializable)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub(super) fn load_from_file<P: AsRef<Path>>(path: P) -> Result<MemoryStore> {
    let path = path.as_ref();
    let store = MemoryStore::new();
    if !path.exists() {
        return Ok(store);
    }
    let json = std::fs::read_to_string(path)?;
    let serializable: SerializableStore = serde_json::from_str(&json)?;
    *store.inner.data.write().unwrap() = normalize(serializable.data);
    Ok(store)
}
