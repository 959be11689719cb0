//! Error types reported by backing stores.

use thiserror::Error;

/// Errors reported by a backing store.
///
/// Listener cancellation hands the same error to many callbacks, so this type
/// is `Clone` and carries no foreign error sources.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The store refused access to a location.
    #[error("Permission denied at {path}")]
    PermissionDenied {
        /// The location access was refused for
        path: String,
    },

    /// A write was rejected.
    #[error("Write to {path} failed: {reason}")]
    WriteFailed {
        /// The location written to
        path: String,
        /// Description of the failure
        reason: String,
    },

    /// Data or arguments the store cannot accept.
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Description of the problem
        reason: String,
    },
}

impl BackendError {
    /// Check if this error is a permission denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, BackendError::PermissionDenied { .. })
    }

    /// Check if this error is a failed write.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, BackendError::WriteFailed { .. })
    }

    /// The location this error concerns, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            BackendError::PermissionDenied { path } | BackendError::WriteFailed { path, .. } => {
                Some(path)
            }
            BackendError::InvalidData { .. } => None,
        }
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
