//! Declaring a merged collection.
//!
//! A collection is built from an ordered list of [`Path`]s (the first one is
//! the master), a set of selected fields and optional filter predicates.
//! Finalizing it yields a [`MergedRef`] that reads and writes all paths at
//! once.
//!
//! ```
//! use mergeview::backend::MemoryStore;
//! use mergeview::collection::{Collection, Path};
//!
//! # fn main() -> mergeview::Result<()> {
//! let store = MemoryStore::new();
//! let mut collection = Collection::new([
//!     Path::new(store.reference("users")),
//!     Path::new(store.reference("profiles")),
//! ])?;
//! collection
//!     .select("users.name")?
//!     .select(("profiles.bio", "about"))?
//!     .filter(|data, _key, _priority| data.get("name").is_some())?;
//! let merged = collection.reference()?;
//! assert_eq!(merged.key(), "[users][profiles]");
//!
//! assert!(collection.select("users.email").is_err());
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod field_map;
mod filter;
mod path;
mod path_manager;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

pub use config::{MergeConfig, TieBreak};
pub use errors::CollectionError;
pub use field_map::{Field, FieldMap, FieldSpec, PathData};
pub use filter::{Filter, Predicate};
pub use path::{Dependency, FieldId, Path};
pub use path_manager::PathManager;

use crate::Result;
use crate::record::{MergeContext, RecordNode};
use crate::reference::MergedRef;

/// Builder of a merged view.
#[derive(Debug)]
pub struct Collection {
    paths: Arc<PathManager>,
    fields: FieldMap,
    filter: Filter,
    config: MergeConfig,
    finalized: bool,
}

impl Collection {
    /// Starts a collection over `paths`. Path declarations are validated here.
    pub fn new(paths: impl IntoIterator<Item = Path>) -> Result<Self> {
        Ok(Self {
            paths: Arc::new(PathManager::new(paths)?),
            fields: FieldMap::new(),
            filter: Filter::new(),
            config: MergeConfig::default(),
            finalized: false,
        })
    }

    pub fn with_config(mut self, config: MergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.finalized {
            return Err(CollectionError::Finalized {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Selects a field, `"path.field"` or `("path.field", "alias")`.
    pub fn select(&mut self, spec: impl Into<FieldSpec>) -> Result<&mut Self> {
        self.ensure_open("select")?;
        self.fields.add(spec, &self.paths)?;
        Ok(self)
    }

    /// Adds a membership predicate over `(merged value, key, priority)`.
    pub fn filter<F>(&mut self, predicate: F) -> Result<&mut Self>
    where
        F: Fn(&Value, &str, &Value) -> bool + Send + Sync + 'static,
    {
        self.ensure_open("filter")?;
        self.filter.add(Arc::new(predicate));
        Ok(self)
    }

    /// Finalizes the collection and returns a reference to the merged set.
    pub fn reference(&mut self) -> Result<MergedRef> {
        if self.fields.is_empty() {
            return Err(CollectionError::NoFields.into());
        }
        self.finalized = true;
        debug!(
            paths = self.paths.len(),
            fields = self.fields.len(),
            filtered = !self.filter.is_empty(),
            "collection finalized"
        );
        let context = MergeContext::new(
            Arc::clone(&self.paths),
            Arc::new(self.fields.clone()),
            Arc::new(self.filter.clone()),
            Arc::new(self.config.clone()),
        );
        Ok(MergedRef::from_node(RecordNode::root(context)))
    }
}
