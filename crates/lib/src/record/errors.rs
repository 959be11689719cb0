//! Error types for reads and writes through merged references.

use thiserror::Error;

/// Errors raised by merged references.
///
/// Write-shape errors are raised before any underlying write is issued.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A primitive was written where it would have to be split across paths.
    #[error("Cannot split a primitive value across {target}")]
    PrimitiveSplit {
        /// Description of the node written to
        target: String,
    },

    /// `update` was given something other than an object.
    #[error("update() of {target} requires an object")]
    UpdateRequiresObject {
        /// Description of the node written to
        target: String,
    },

    /// The field is derived and cannot be written.
    #[error("Field '{field}' is read-only")]
    ReadOnlyField {
        /// Alias of the field
        field: String,
    },

    /// The operation has no merged meaning.
    #[error("{operation} is not supported on a merged reference; {hint}")]
    Unsupported {
        /// The rejected operation
        operation: String,
        /// What to do instead
        hint: String,
    },

    /// A priority that is not null, a number or a string.
    #[error("Invalid priority: {priority}")]
    InvalidPriority {
        /// The rejected priority, as JSON
        priority: String,
    },

    /// A write ended without reporting an outcome.
    #[error("Write to {target} was abandoned")]
    WriteAbandoned {
        /// Description of the write target
        target: String,
    },
}

impl RecordError {
    pub(crate) fn unsupported(operation: &str) -> Self {
        RecordError::Unsupported {
            operation: operation.to_string(),
            hint: "operate on one of the underlying paths instead".to_string(),
        }
    }

    /// Check if this error rejected the shape of a written value.
    pub fn is_write_shape_error(&self) -> bool {
        matches!(
            self,
            RecordError::PrimitiveSplit { .. }
                | RecordError::UpdateRequiresObject { .. }
                | RecordError::InvalidPriority { .. }
        )
    }

    /// Check if this error rejected an unsupported operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            RecordError::Unsupported { .. } | RecordError::ReadOnlyField { .. }
        )
    }
}

impl From<RecordError> for crate::Error {
    fn from(err: RecordError) -> Self {
        crate::Error::Record(err)
    }
}
