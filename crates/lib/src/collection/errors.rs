//! Error types for building merged collections.

use thiserror::Error;

/// Configuration errors raised while a collection is built.
///
/// All of these are detected synchronously, before any subscription exists.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    /// A collection needs at least one path.
    #[error("A collection needs at least one path")]
    NoPaths,

    /// A path alias is empty or contains a `.`.
    #[error("Invalid path alias '{alias}'")]
    InvalidAlias {
        /// The rejected alias
        alias: String,
    },

    /// The first path declared a dependency.
    #[error("The master path '{alias}' cannot depend on another path")]
    MasterDependency {
        /// Alias of the master path
        alias: String,
    },

    /// Two paths share an alias.
    #[error("Duplicate path alias '{alias}'")]
    DuplicatePathAlias {
        /// The duplicated alias
        alias: String,
    },

    /// Two paths point at the same location.
    #[error("Duplicate path address {url}")]
    DuplicatePathUrl {
        /// The duplicated address
        url: String,
    },

    /// A path alias that no declared path carries.
    #[error("Unknown path '{alias}'")]
    UnknownPath {
        /// The unknown alias
        alias: String,
    },

    /// Path dependencies form a cycle.
    #[error("Dependency cycle: {chain}")]
    DependencyCycle {
        /// The dependency chain, e.g. `a.x >> b.y >> a.x`
        chain: String,
    },

    /// A dependency declaration that cannot be parsed.
    #[error("Invalid dependency '{spec}': expected 'path.field'")]
    InvalidDependency {
        /// The rejected declaration
        spec: String,
    },

    /// A field selection that cannot be parsed.
    #[error("Invalid field '{spec}': {reason}")]
    InvalidFieldSpec {
        /// The rejected selection
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// Two fields share an alias.
    #[error("Duplicate field alias '{alias}'")]
    DuplicateFieldAlias {
        /// The duplicated alias
        alias: String,
    },

    /// One alias is the nested prefix of another.
    #[error("Field alias '{alias}' conflicts with '{other}'")]
    ConflictingFieldAlias {
        /// The alias being added
        alias: String,
        /// The alias it conflicts with
        other: String,
    },

    /// A field of a dependent path was selected before the field it joins on.
    #[error("Path '{path}' joins on '{dependency}', which is not a selected field")]
    UnresolvedDependencyField {
        /// The dependent path
        path: String,
        /// The dependency, as `path.field`
        dependency: String,
    },

    /// `reference()` was called before any field was selected.
    #[error("No fields selected")]
    NoFields,

    /// The collection was already turned into a reference.
    #[error("Cannot {operation} after the collection was finalized")]
    Finalized {
        /// The rejected operation
        operation: String,
    },

    /// Configuration that cannot be parsed.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem
        reason: String,
    },
}

impl CollectionError {
    /// Check if this error concerns path declarations.
    pub fn is_path_error(&self) -> bool {
        matches!(
            self,
            CollectionError::NoPaths
                | CollectionError::InvalidAlias { .. }
                | CollectionError::MasterDependency { .. }
                | CollectionError::DuplicatePathAlias { .. }
                | CollectionError::DuplicatePathUrl { .. }
                | CollectionError::UnknownPath { .. }
                | CollectionError::DependencyCycle { .. }
                | CollectionError::InvalidDependency { .. }
        )
    }

    /// Check if this error concerns field selection.
    pub fn is_field_error(&self) -> bool {
        matches!(
            self,
            CollectionError::InvalidFieldSpec { .. }
                | CollectionError::DuplicateFieldAlias { .. }
                | CollectionError::ConflictingFieldAlias { .. }
                | CollectionError::UnresolvedDependencyField { .. }
                | CollectionError::NoFields
        )
    }

    /// Check if this error is a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, CollectionError::DependencyCycle { .. })
    }
}

impl From<CollectionError> for crate::Error {
    fn from(err: CollectionError) -> Self {
        crate::Error::Collection(err)
    }
}
