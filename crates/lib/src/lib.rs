//!
//! Mergeview: merged, filtered views over several hierarchical key-value paths.
//! This library joins records that live under different locations of a store and
//! exposes them through a single reference that can be read, listened to and
//! written like a plain one.
//!
//! ## Core Concepts
//!
//! * **Paths (`collection::Path`)**: A backing location holding one record per
//!   key. The first path of a collection is the master; its keys decide which
//!   records exist. Other paths either share the master's keys or read their key
//!   from a field of another path (a dependency).
//! * **Collections (`collection::Collection`)**: The builder that declares paths,
//!   selects fields under aliases and installs filter predicates.
//! * **Merged references (`reference::MergedRef`)**: The handle on the set, a
//!   record or a location inside a record's field. Reads merge, writes split.
//! * **Merged snapshots (`record::MergedSnapshot`)**: Immutable views of merged
//!   data, backed by the raw snapshots of every contributing path.
//! * **Backing stores (`backend::BackingRef`)**: The pluggable hierarchical store
//!   interface. [`backend::MemoryStore`] is the bundled implementation.
//! * **Data model (`data`)**: JSON-shaped trees with priorities, child ordering
//!   and the child diffing used to synthesize events.

pub mod backend;
pub mod clock;
pub mod collection;
pub mod constants;
pub mod data;
pub(crate) mod events;
pub mod record;
pub mod reference;

pub use clock::{Clock, SystemClock};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

pub use backend::{EventType, MemoryStore};
pub use collection::{Collection, MergeConfig, Path};
pub use record::MergedSnapshot;
pub use reference::{MergedRef, WriteCompletion};

/// Result type used throughout the Mergeview library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Mergeview library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured errors reported by a backing store
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured errors from declaring a collection
    #[error(transparent)]
    Collection(collection::CollectionError),

    /// Structured errors from reading or writing merged records
    #[error(transparent)]
    Record(record::RecordError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Backend(_) => "backend",
            Error::Collection(_) => "collection",
            Error::Record(_) => "record",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates permission was denied.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_permission_denied(),
            _ => false,
        }
    }

    /// Check if a backing store rejected a write.
    pub fn is_write_failure(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_write_failure(),
            _ => false,
        }
    }

    /// Check if this error comes from an invalid collection declaration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::Collection(_))
    }

    /// Check if this error is a dependency cycle between paths.
    pub fn is_cycle(&self) -> bool {
        match self {
            Error::Collection(collection_err) => collection_err.is_cycle(),
            _ => false,
        }
    }

    /// Check if a value could not be split across the paths it targets.
    pub fn is_write_shape_error(&self) -> bool {
        match self {
            Error::Record(record_err) => record_err.is_write_shape_error(),
            _ => false,
        }
    }

    /// Check if the operation is not available on a merged reference.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::Record(record_err) => record_err.is_unsupported(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
