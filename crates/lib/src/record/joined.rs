//! The record level: one record of each path joined under one key.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use super::{
    MergeContext, PendingWrite, RawSnapshots, RecordBehavior, RecordError, RecordField,
    RecordKind, RecordNode, WriteMode,
};
use crate::backend::BackingRef;
use crate::collection::{Field, FieldId, PathData, TieBreak};
use crate::constants::PRIORITY_KEY;
use crate::data::{DataSnapshot, key_from_value, split_export, with_priority};

#[derive(Debug, Clone)]
pub(crate) struct Record {
    context: MergeContext,
    key: String,
}

/// Deep-merges `source` into `target`. Objects merge recursively; for any
/// other collision the tie-break decides.
fn merge_maps(target: &mut Map<String, Value>, source: Map<String, Value>, tie_break: TieBreak) {
    for (key, value) in source {
        match target.get_mut(&key) {
            None => {
                target.insert(key, value);
            }
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(incoming) = value {
                    merge_maps(existing, incoming, tie_break);
                }
            }
            Some(existing) => {
                if tie_break == TieBreak::LatestDeclared {
                    *existing = value;
                }
            }
        }
    }
}

impl Record {
    pub(crate) fn new(context: MergeContext, key: &str) -> Self {
        Self {
            context,
            key: key.to_string(),
        }
    }

    pub(crate) fn context(&self) -> &MergeContext {
        &self.context
    }

    pub(crate) fn id(&self) -> &str {
        &self.key
    }

    fn master<'a>(&self, raw: &'a RawSnapshots) -> Option<&'a DataSnapshot> {
        raw.get(self.context.master_alias())
            .filter(|master| master.exists())
    }

    fn field_present(&self, raw: &RawSnapshots, field: &Field) -> bool {
        let Some(snapshot) = raw.get(&field.path) else {
            return false;
        };
        match &field.id {
            FieldId::Key => true,
            FieldId::Value => snapshot.exists(),
            FieldId::Child(child) => snapshot.has_child(child),
        }
    }

    /// The record location of a static path.
    pub(crate) fn static_reference(&self, alias: &str) -> Option<Arc<dyn BackingRef>> {
        if !self.context.paths.is_static(alias) {
            return None;
        }
        Some(self.context.paths.resolve(alias)?.child(&self.key))
    }

    /// The record key of path `alias` as determined by the written `data`.
    fn written_key(&self, alias: &str, data: &Map<String, Value>) -> Option<String> {
        match self.context.paths.dependency_of(alias) {
            None => Some(self.key.clone()),
            Some(dependency) if dependency.field == FieldId::Key => {
                self.written_key(&dependency.path, data)
            }
            Some(dependency) => {
                let field = self
                    .context
                    .fields
                    .find(&dependency.path, &dependency.field)?;
                key_from_value(self.context.fields.written_value(data, &field.alias)?)
            }
        }
    }

    fn child_nulls(&self, alias: &str, present: &Map<String, Value>) -> Map<String, Value> {
        let mut nulls = Map::new();
        for field in self.context.fields.fields_of(alias) {
            if let FieldId::Child(child) = &field.id {
                if !present.contains_key(child) {
                    nulls.insert(child.clone(), Value::Null);
                }
            }
        }
        nulls
    }

    fn has_value_field(&self, alias: &str) -> bool {
        self.context
            .fields
            .fields_of(alias)
            .any(|field| field.id == FieldId::Value)
    }

    fn save_object(
        &self,
        data: Map<String, Value>,
        priority: Value,
        mode: WriteMode,
    ) -> Result<Vec<PendingWrite>, RecordError> {
        let payloads = self.context.fields.denest(&data);
        let master_alias = self.context.master_alias();
        let mut writes = Vec::new();
        let mut priority_written = priority.is_null();

        for path in self.context.paths.paths() {
            let alias = path.name();
            let payload = payloads.iter().find(|payload| payload.path == alias);
            let is_static = self.context.paths.is_static(alias);
            if payload.is_none() && (mode == WriteMode::Update || !is_static) {
                continue;
            }
            let Some(key) = self.written_key(alias, &data) else {
                warn!(
                    record = %self.key,
                    path = %alias,
                    "skipping write, dependency key not in payload"
                );
                continue;
            };
            let reference = path.child(&key);
            let record_priority = if alias == master_alias {
                priority.clone()
            } else {
                Value::Null
            };

            let write = match payload {
                Some(PathData {
                    whole: true, data, ..
                }) => Some(PendingWrite::Set {
                    reference,
                    value: with_priority(data.clone(), record_priority.clone()),
                }),
                Some(PathData { data, .. }) => {
                    let mut values = data.as_object().cloned().unwrap_or_default();
                    if mode == WriteMode::Set {
                        let nulls = self.child_nulls(alias, &values);
                        values.extend(nulls);
                    }
                    if !record_priority.is_null() {
                        values.insert(PRIORITY_KEY.to_string(), record_priority.clone());
                    }
                    (!values.is_empty()).then_some(PendingWrite::Update { reference, values })
                }
                None if self.has_value_field(alias) => Some(PendingWrite::Set {
                    reference,
                    value: Value::Null,
                }),
                None => {
                    let values = self.child_nulls(alias, &Map::new());
                    (!values.is_empty()).then_some(PendingWrite::Update { reference, values })
                }
            };
            if let Some(write) = write {
                if alias == master_alias
                    && matches!(
                        write,
                        PendingWrite::Set { .. } | PendingWrite::Update { .. }
                    )
                    && payload.is_some()
                {
                    priority_written = true;
                }
                writes.push(write);
            }
        }

        if !priority_written {
            if let Some(reference) = self.static_reference(master_alias) {
                writes.push(PendingWrite::SetPriority {
                    reference,
                    priority,
                });
            }
        }
        Ok(writes)
    }

    fn save_primitive(&self, value: Value, priority: Value) -> Result<Vec<PendingWrite>, RecordError> {
        let participating = self
            .context
            .fields
            .participating_paths(&self.context.paths);
        let writable: Vec<&str> = participating
            .into_iter()
            .filter(|alias| {
                self.context
                    .fields
                    .fields_of(alias)
                    .any(|field| field.id != FieldId::Key)
            })
            .collect();
        match writable.as_slice() {
            [alias] if self.has_value_field(alias) => {
                let reference =
                    self.static_reference(alias)
                        .ok_or_else(|| RecordError::PrimitiveSplit {
                            target: self.describe(),
                        })?;
                let priority = if *alias == self.context.master_alias() {
                    priority
                } else {
                    Value::Null
                };
                Ok(vec![PendingWrite::Set {
                    reference,
                    value: with_priority(value, priority),
                }])
            }
            _ => Err(RecordError::PrimitiveSplit {
                target: self.describe(),
            }),
        }
    }
}

impl RecordBehavior for Record {
    fn has_child(&self, raw: &RawSnapshots, key: &str) -> bool {
        if self.master(raw).is_none() {
            return false;
        }
        match self.context.fields.get(key) {
            Some(field) => self.field_present(raw, field),
            None => raw
                .get(self.context.master_alias())
                .is_some_and(|master| master.has_child(key)),
        }
    }

    fn for_each_key(&self, raw: &RawSnapshots, f: &mut dyn FnMut(&str) -> bool) -> bool {
        if self.master(raw).is_none() {
            return false;
        }
        for field in self.context.fields.fields() {
            if self.field_present(raw, field) && f(&field.alias) {
                return true;
            }
        }
        false
    }

    fn get_child_snaps(&self, raw: &RawSnapshots, key: &str) -> RawSnapshots {
        let Some(field) = self.context.fields.get(key) else {
            return raw
                .get(self.context.master_alias())
                .map(|master| RawSnapshots::single(self.context.master_alias(), master.child(key)))
                .unwrap_or_default();
        };
        let Some(snapshot) = raw.get(&field.path) else {
            return RawSnapshots::new();
        };
        let child = match &field.id {
            FieldId::Key => DataSnapshot::new(
                snapshot.reference(),
                snapshot
                    .key()
                    .map(|key| Value::String(key.to_string()))
                    .unwrap_or(Value::Null),
            ),
            FieldId::Value => snapshot.clone(),
            FieldId::Child(child) => snapshot.child(child),
        };
        RawSnapshots::single(&field.path, child)
    }

    fn merge_data(&self, raw: &RawSnapshots, export: bool) -> Value {
        let Some(master) = self.master(raw) else {
            return Value::Null;
        };
        let mut merged = Map::new();
        for path in self.context.paths.paths() {
            let Some(snapshot) = raw.get(path.name()) else {
                continue;
            };
            let part = self.context.fields.extract(path.name(), snapshot, export);
            merge_maps(&mut merged, part, self.context.config.tie_break);
        }
        if merged.is_empty() {
            return Value::Null;
        }
        if export {
            let priority = master.priority();
            if !priority.is_null() {
                merged.insert(PRIORITY_KEY.to_string(), priority);
            }
        }
        Value::Object(merged)
    }

    fn get_priority(&self, raw: &RawSnapshots) -> Value {
        self.master(raw)
            .map(DataSnapshot::priority)
            .unwrap_or(Value::Null)
    }

    fn make_child(&self, key: &str, node: &RecordNode) -> RecordKind {
        RecordKind::Field(RecordField::for_record(self, key, node))
    }

    fn save_data(&self, value: Value, mode: WriteMode) -> Result<Vec<PendingWrite>, RecordError> {
        let (value, priority) = split_export(value);
        match value {
            Value::Null => Ok(self
                .context
                .paths
                .paths()
                .iter()
                .filter_map(|path| self.static_reference(path.name()))
                .map(|reference| PendingWrite::Set {
                    reference,
                    value: Value::Null,
                })
                .collect()),
            Value::Object(data) => self.save_object(data, priority, mode),
            _ if mode == WriteMode::Update => Err(RecordError::UpdateRequiresObject {
                target: self.describe(),
            }),
            primitive => self.save_primitive(primitive, priority),
        }
    }

    fn save_priority(&self, priority: Value) -> Result<Vec<PendingWrite>, RecordError> {
        let reference = self
            .static_reference(self.context.master_alias())
            .ok_or_else(|| RecordError::unsupported("set_priority"))?;
        Ok(vec![PendingWrite::SetPriority {
            reference,
            priority,
        }])
    }

    fn key(&self) -> String {
        self.key.clone()
    }

    fn describe(&self) -> String {
        let paths = self.context.paths.paths();
        let urls: Vec<String> = paths
            .iter()
            .map(|path| match self.static_reference(path.name()) {
                Some(reference) => reference.url(),
                None => path.url(),
            })
            .collect();
        if urls.len() == 1 {
            return urls.into_iter().next().unwrap_or_default();
        }
        urls.into_iter().map(|url| format!("[{url}]")).collect()
    }
}
