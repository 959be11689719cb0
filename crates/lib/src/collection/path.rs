//! Paths participating in a merge.

use std::fmt;
use std::sync::Arc;

use super::errors::CollectionError;
use crate::backend::BackingRef;
use crate::constants::{KEY_FIELD, VALUE_FIELD};
use crate::data::{DataSnapshot, key_from_value};

/// Identifies what a field selects from a path's record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldId {
    /// The record's key (`$key`).
    Key,
    /// The record's whole value (`$value`).
    Value,
    /// One child of the record.
    Child(String),
}

impl FieldId {
    pub fn parse(id: &str) -> Self {
        match id {
            KEY_FIELD => FieldId::Key,
            VALUE_FIELD => FieldId::Value,
            other => FieldId::Child(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldId::Key => KEY_FIELD,
            FieldId::Value => VALUE_FIELD,
            FieldId::Child(id) => id,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares that a path's record key is read from a field of another path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Alias of the path the key is read from.
    pub path: String,
    /// The field holding the key.
    pub field: FieldId,
}

impl Dependency {
    pub fn new(path: impl Into<String>, field: FieldId) -> Self {
        Self {
            path: path.into(),
            field,
        }
    }

    /// Parses `"path.field"`.
    pub fn parse(spec: &str) -> Result<Self, CollectionError> {
        match spec.split_once('.') {
            Some((path, field)) if !path.is_empty() && !field.is_empty() => {
                Ok(Self::new(path, FieldId::parse(field)))
            }
            _ => Err(CollectionError::InvalidDependency {
                spec: spec.to_string(),
            }),
        }
    }

    /// Reads the dependent key out of the record snapshot of the path this
    /// dependency points at. `None` means the dependent record is absent.
    pub fn resolve_key(&self, snapshot: &DataSnapshot) -> Option<String> {
        match &self.field {
            FieldId::Key => snapshot.key().map(str::to_string),
            FieldId::Value => key_from_value(&snapshot.val()),
            FieldId::Child(id) => key_from_value(&snapshot.child(id).val()),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.path, self.field)
    }
}

/// One location in the backing store, with the alias it is known by.
///
/// ```
/// use mergeview::backend::MemoryStore;
/// use mergeview::collection::Path;
///
/// let store = MemoryStore::new();
/// let users = Path::new(store.reference("users"));
/// assert_eq!(users.name(), "users");
///
/// let profiles = Path::new(store.reference("data/profiles"))
///     .alias("p")
///     .depends_on("users.profileId")
///     .unwrap();
/// assert_eq!(profiles.name(), "p");
/// assert_eq!(profiles.dependency().unwrap().to_string(), "users.profileId");
/// ```
#[derive(Debug, Clone)]
pub struct Path {
    reference: Arc<dyn BackingRef>,
    alias: String,
    dependency: Option<Dependency>,
}

impl Path {
    /// A path aliased by its location's key.
    pub fn new(reference: Arc<dyn BackingRef>) -> Self {
        let alias = reference.key().unwrap_or_else(|| "root".to_string());
        Self {
            reference,
            alias,
            dependency: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Makes the record key of this path the value of `spec` (`"path.field"`).
    pub fn depends_on(mut self, spec: &str) -> Result<Self, CollectionError> {
        self.dependency = Some(Dependency::parse(spec)?);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.alias
    }

    pub fn reference(&self) -> &Arc<dyn BackingRef> {
        &self.reference
    }

    pub fn url(&self) -> String {
        self.reference.url()
    }

    /// The explicitly declared dependency.
    pub fn dependency(&self) -> Option<&Dependency> {
        self.dependency.as_ref()
    }

    /// The record location for `key`.
    pub fn child(&self, key: &str) -> Arc<dyn BackingRef> {
        self.reference.child(key)
    }

    pub(crate) fn with_reference(&self, reference: Arc<dyn BackingRef>) -> Path {
        Path {
            reference,
            alias: self.alias.clone(),
            dependency: self.dependency.clone(),
        }
    }
}
