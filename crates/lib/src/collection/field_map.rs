//! Projection of path records into merged records and back.

use serde_json::{Map, Value};
use tracing::warn;

use super::errors::CollectionError;
use super::path::{FieldId, Path};
use super::path_manager::PathManager;
use crate::data::DataSnapshot;

/// One selected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Alias of the path the field is read from.
    pub path: String,
    pub id: FieldId,
    /// Key of the field in merged records.
    pub alias: String,
    /// True if the alias is a `.`-separated nested destination.
    pub nested: bool,
}

impl Field {
    fn alias_parts(&self) -> impl Iterator<Item = &str> {
        self.alias.split('.')
    }
}

/// A field selection: `"path.field"` with an optional alias.
///
/// ```
/// use mergeview::collection::FieldSpec;
///
/// let plain: FieldSpec = "users.name".into();
/// let aliased: FieldSpec = ("users.name", "displayName").into();
/// assert_eq!(plain.alias(), None);
/// assert_eq!(aliased.alias(), Some("displayName"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    spec: String,
    alias: Option<String>,
}

impl FieldSpec {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            alias: None,
        }
    }

    pub fn aliased(spec: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

impl From<&str> for FieldSpec {
    fn from(spec: &str) -> Self {
        FieldSpec::new(spec)
    }
}

impl From<String> for FieldSpec {
    fn from(spec: String) -> Self {
        FieldSpec::new(spec)
    }
}

impl From<(&str, &str)> for FieldSpec {
    fn from((spec, alias): (&str, &str)) -> Self {
        FieldSpec::aliased(spec, alias)
    }
}

/// The write payload for one path, produced by [`FieldMap::denest`].
#[derive(Debug, Clone, PartialEq)]
pub struct PathData {
    pub path: String,
    pub data: Value,
    /// True when the payload replaces the whole record (a `$value` field was
    /// written), false when it lists individual children.
    pub whole: bool,
}

/// The projection table of a collection.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: Vec<Field>,
}

fn default_alias(path: &Path, id: &FieldId) -> String {
    match id {
        FieldId::Key => id.as_str().to_string(),
        FieldId::Value => path.name().to_string(),
        FieldId::Child(child) => child.rsplit('/').next().unwrap_or(child).to_string(),
    }
}

fn insert_nested(target: &mut Map<String, Value>, alias: &str, value: Value) {
    let mut parts = alias.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => current = map,
            _ => return,
        }
    }
}

fn lookup_nested<'a>(data: &'a Map<String, Value>, alias: &str) -> Option<&'a Value> {
    let mut parts = alias.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    (!current.is_null()).then_some(current)
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field selected from one of `paths`.
    pub fn add(
        &mut self,
        spec: impl Into<FieldSpec>,
        paths: &PathManager,
    ) -> Result<&Field, CollectionError> {
        let spec = spec.into();
        let invalid = |reason: &str| CollectionError::InvalidFieldSpec {
            spec: spec.spec().to_string(),
            reason: reason.to_string(),
        };

        let (path_alias, id) = spec
            .spec()
            .split_once('.')
            .ok_or_else(|| invalid("expected 'path.field'"))?;
        if id.is_empty() {
            return Err(invalid("empty field id"));
        }
        let path = paths
            .resolve(path_alias)
            .ok_or_else(|| CollectionError::UnknownPath {
                alias: path_alias.to_string(),
            })?;
        let id = FieldId::parse(id);
        let alias = spec
            .alias()
            .map(str::to_string)
            .unwrap_or_else(|| default_alias(path, &id));
        if alias.is_empty() || alias.contains('/') || alias.split('.').any(str::is_empty) {
            return Err(invalid("invalid alias"));
        }

        for existing in &self.fields {
            if existing.alias == alias {
                return Err(CollectionError::DuplicateFieldAlias { alias });
            }
            let (shorter, longer) = if existing.alias.len() < alias.len() {
                (&existing.alias, &alias)
            } else {
                (&alias, &existing.alias)
            };
            if longer.starts_with(shorter.as_str()) && longer[shorter.len()..].starts_with('.') {
                return Err(CollectionError::ConflictingFieldAlias {
                    alias: alias.clone(),
                    other: existing.alias.clone(),
                });
            }
        }

        let mut current = path.name();
        while let Some(dependency) = paths.dependency_of(current) {
            if dependency.field != FieldId::Key
                && self.find(&dependency.path, &dependency.field).is_none()
            {
                return Err(CollectionError::UnresolvedDependencyField {
                    path: path.name().to_string(),
                    dependency: dependency.to_string(),
                });
            }
            current = &dependency.path;
        }

        self.fields.push(Field {
            path: path.name().to_string(),
            nested: alias.contains('.'),
            id,
            alias,
        });
        Ok(&self.fields[self.fields.len() - 1])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.alias == alias)
    }

    pub fn id_for(&self, alias: &str) -> Option<&FieldId> {
        self.get(alias).map(|field| &field.id)
    }

    /// The field selecting `id` from `path`, if any.
    pub fn find(&self, path: &str, id: &FieldId) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.path == path && field.id == *id)
    }

    pub fn fields_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |field| field.path == path)
    }

    /// Aliases of the paths that have at least one field, in path order.
    pub fn participating_paths<'a>(&self, paths: &'a PathManager) -> Vec<&'a str> {
        paths
            .paths()
            .iter()
            .map(Path::name)
            .filter(|alias| self.fields_of(alias).next().is_some())
            .collect()
    }

    /// Projects one path record into the fields selected from that path.
    ///
    /// Absent children are omitted. With `export` set, values keep their
    /// priorities in export form.
    pub fn extract(&self, path: &str, snapshot: &DataSnapshot, export: bool) -> Map<String, Value> {
        let mut out = Map::new();
        let read = |snapshot: DataSnapshot| {
            if export {
                snapshot.export_val()
            } else {
                snapshot.val()
            }
        };
        for field in self.fields_of(path) {
            let value = match &field.id {
                FieldId::Key => snapshot
                    .key()
                    .map(|key| Value::String(key.to_string()))
                    .unwrap_or(Value::Null),
                FieldId::Value => read(snapshot.clone()),
                FieldId::Child(child) => read(snapshot.child(child)),
            };
            if !value.is_null() {
                insert_nested(&mut out, &field.alias, value);
            }
        }
        out
    }

    /// The non-null value written to the field `alias` in a merged payload.
    pub fn written_value<'a>(&self, data: &'a Map<String, Value>, alias: &str) -> Option<&'a Value> {
        lookup_nested(data, alias)
    }

    /// Splits a merged write payload into per-path payloads, in field order.
    ///
    /// `$key` fields are derived and never written. Keys of `data` no field
    /// maps are dropped with a warning.
    pub fn denest(&self, data: &Map<String, Value>) -> Vec<PathData> {
        struct Pending {
            path: String,
            whole: Option<Value>,
            children: Map<String, Value>,
        }

        for key in data.keys() {
            let mapped = crate::data::is_meta_key(key)
                || self
                    .fields
                    .iter()
                    .any(|field| field.alias_parts().next() == Some(key.as_str()));
            if !mapped {
                warn!(key = %key, "dropping write to unmapped field");
            }
        }

        let mut pending: Vec<Pending> = Vec::new();
        for field in &self.fields {
            if field.id == FieldId::Key {
                continue;
            }
            let Some(value) = lookup_nested(data, &field.alias) else {
                continue;
            };
            let index = match pending.iter().position(|p| p.path == field.path) {
                Some(index) => index,
                None => {
                    pending.push(Pending {
                        path: field.path.clone(),
                        whole: None,
                        children: Map::new(),
                    });
                    pending.len() - 1
                }
            };
            let entry = &mut pending[index];
            match &field.id {
                FieldId::Value => entry.whole = Some(value.clone()),
                FieldId::Child(child) => {
                    entry.children.insert(child.clone(), value.clone());
                }
                FieldId::Key => {}
            }
        }

        pending
            .into_iter()
            .map(|entry| match entry.whole {
                Some(Value::Object(mut base)) => {
                    base.extend(entry.children);
                    PathData {
                        path: entry.path,
                        data: Value::Object(base),
                        whole: true,
                    }
                }
                Some(other) => PathData {
                    path: entry.path,
                    data: other,
                    whole: true,
                },
                None => PathData {
                    path: entry.path,
                    data: Value::Object(entry.children),
                    whole: false,
                },
            })
            .collect()
    }
}
