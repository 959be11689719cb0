//! The ordered set of paths of a collection and their dependency graph.

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::CollectionError;
use super::path::{Dependency, FieldId, Path};
use crate::backend::BackingRef;

/// Owns the paths of a collection. The first path is the master.
///
/// Every other path has exactly one effective dependency: the one it declared,
/// or the master's `$key` when it declared none. Construction fails when the
/// declarations are inconsistent, so a manager that exists is always valid.
#[derive(Debug, Clone)]
pub struct PathManager {
    paths: Vec<Path>,
    by_url: HashMap<String, String>,
    dependencies: HashMap<String, Dependency>,
}

impl PathManager {
    pub fn new(paths: impl IntoIterator<Item = Path>) -> Result<Self, CollectionError> {
        let mut manager = PathManager {
            paths: Vec::new(),
            by_url: HashMap::new(),
            dependencies: HashMap::new(),
        };
        for path in paths {
            manager.register(path)?;
        }
        if manager.paths.is_empty() {
            return Err(CollectionError::NoPaths);
        }
        manager.check_dependencies()?;
        Ok(manager)
    }

    fn register(&mut self, path: Path) -> Result<(), CollectionError> {
        let alias = path.name().to_string();
        if alias.is_empty() || alias.contains(['.', '/']) {
            return Err(CollectionError::InvalidAlias { alias });
        }
        let is_master = self.paths.is_empty();
        if is_master && path.dependency().is_some() {
            return Err(CollectionError::MasterDependency { alias });
        }
        let url = path.url();
        if self.by_url.contains_key(&url) {
            return Err(CollectionError::DuplicatePathUrl { url });
        }
        if self.resolve(&alias).is_some() {
            return Err(CollectionError::DuplicatePathAlias { alias });
        }

        if !is_master {
            let dependency = path
                .dependency()
                .cloned()
                .unwrap_or_else(|| Dependency::new(self.master().name(), FieldId::Key));
            self.dependencies.insert(alias.clone(), dependency);
        }
        self.by_url.insert(url, alias);
        self.paths.push(path);
        Ok(())
    }

    fn check_dependencies(&self) -> Result<(), CollectionError> {
        for path in &self.paths[1..] {
            let mut visited = vec![path.name()];
            let mut chain: Vec<String> = Vec::new();
            let mut current = path.name();
            while let Some(dependency) = self.dependencies.get(current) {
                if self.resolve(&dependency.path).is_none() {
                    return Err(CollectionError::UnknownPath {
                        alias: dependency.path.clone(),
                    });
                }
                chain.push(dependency.to_string());
                if visited.contains(&dependency.path.as_str()) {
                    if let Some(repeated) = self.dependencies.get(&dependency.path) {
                        chain.push(repeated.to_string());
                    }
                    return Err(CollectionError::DependencyCycle {
                        chain: chain.join(" >> "),
                    });
                }
                visited.push(&dependency.path);
                current = &dependency.path;
            }
        }
        Ok(())
    }

    pub fn master(&self) -> &Path {
        &self.paths[0]
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn resolve(&self, alias: &str) -> Option<&Path> {
        self.paths.iter().find(|path| path.name() == alias)
    }

    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.paths.iter().position(|path| path.name() == alias)
    }

    pub fn url_for(&self, alias: &str) -> Option<String> {
        self.resolve(alias).map(Path::url)
    }

    pub fn alias_for(&self, url: &str) -> Option<&str> {
        self.by_url.get(url).map(String::as_str)
    }

    /// The effective dependency of a path; `None` for the master.
    pub fn dependency_of(&self, alias: &str) -> Option<&Dependency> {
        self.dependencies.get(alias)
    }

    /// True if the path's record key always equals the record id, i.e. every
    /// dependency on its chain reads a `$key`.
    pub fn is_static(&self, alias: &str) -> bool {
        match self.dependency_of(alias) {
            None => true,
            Some(dependency) => {
                dependency.field == FieldId::Key && self.is_static(&dependency.path)
            }
        }
    }

    /// A copy whose master reads from `reference`.
    pub fn with_master(&self, reference: Arc<dyn BackingRef>) -> PathManager {
        let mut next = self.clone();
        next.paths[0] = self.paths[0].with_reference(reference);
        next
    }
}
