//! The field level: one field of a record and every location below it.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use super::{
    MergeContext, MergedCallback, MergedCancel, MergedSnapshot, PendingWrite, RawSnapshots,
    Record, RecordBehavior, RecordError, RecordKind, RecordNode, WriteMode, WriteResult, execute,
};
use crate::backend::{BackendError, BackingRef, EventType};
use crate::collection::FieldId;
use crate::data::DataSnapshot;

/// Where a field's data lives.
#[derive(Clone)]
pub(crate) enum FieldTarget {
    /// A fixed backing location.
    Static(Arc<dyn BackingRef>),
    /// A location on a dynamic path, known only once the owning record's
    /// dependency keys have been read.
    Dynamic {
        record: RecordNode,
        alias: String,
        subpath: Vec<String>,
    },
}

#[derive(Clone)]
pub(crate) struct RecordField {
    context: MergeContext,
    key: String,
    /// Alias of the path the data is read from.
    path: String,
    target: FieldTarget,
    read_only: bool,
}

impl RecordField {
    pub(crate) fn for_record(record: &Record, alias: &str, node: &RecordNode) -> Self {
        let context = record.context().clone();
        let (path, target, read_only) = match context.fields.get(alias) {
            Some(field) => {
                let target = match record.static_reference(&field.path) {
                    Some(reference) => FieldTarget::Static(match &field.id {
                        FieldId::Child(child) => reference.child(child),
                        FieldId::Key | FieldId::Value => reference,
                    }),
                    None => FieldTarget::Dynamic {
                        record: node.clone(),
                        alias: alias.to_string(),
                        subpath: Vec::new(),
                    },
                };
                (field.path.clone(), target, field.id == FieldId::Key)
            }
            None => {
                let master = context.paths.master();
                (
                    master.name().to_string(),
                    FieldTarget::Static(master.child(record.id()).child(alias)),
                    false,
                )
            }
        };
        Self {
            context,
            key: alias.to_string(),
            path,
            target,
            read_only,
        }
    }

    pub(crate) fn context(&self) -> &MergeContext {
        &self.context
    }

    pub(crate) fn target(&self) -> &FieldTarget {
        &self.target
    }

    /// Alias of the path the data is read from.
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn retarget(&self, reference: Arc<dyn BackingRef>) -> Self {
        Self {
            target: FieldTarget::Static(reference),
            ..self.clone()
        }
    }

    fn child_of(&self, key: &str) -> Self {
        let target = match &self.target {
            FieldTarget::Static(reference) => FieldTarget::Static(reference.child(key)),
            FieldTarget::Dynamic {
                record,
                alias,
                subpath,
            } => {
                let mut subpath = subpath.clone();
                subpath.push(key.to_string());
                FieldTarget::Dynamic {
                    record: record.clone(),
                    alias: alias.clone(),
                    subpath,
                }
            }
        };
        Self {
            context: self.context.clone(),
            key: key.to_string(),
            path: self.path.clone(),
            target,
            read_only: self.read_only,
        }
    }

    fn snapshot<'a>(&self, raw: &'a RawSnapshots) -> Option<&'a DataSnapshot> {
        raw.get(&self.path)
    }

    fn check_writable(&self) -> Result<(), RecordError> {
        if self.read_only {
            return Err(RecordError::ReadOnlyField {
                field: self.key.clone(),
            });
        }
        Ok(())
    }

    /// Builds the write for a location once it is known.
    fn write_to(
        &self,
        make: impl FnOnce(Arc<dyn BackingRef>) -> PendingWrite + Send + 'static,
    ) -> PendingWrite {
        match &self.target {
            FieldTarget::Static(reference) => make(Arc::clone(reference)),
            FieldTarget::Dynamic {
                record,
                alias,
                subpath,
            } => deferred(self.describe(), record.clone(), alias.clone(), subpath.clone(), make),
        }
    }
}

/// Reads the owning record once to find a dynamic field's location, then
/// issues the write built by `make`. An unresolved location skips the write.
fn deferred(
    label: String,
    record: RecordNode,
    alias: String,
    subpath: Vec<String>,
    make: impl FnOnce(Arc<dyn BackingRef>) -> PendingWrite + Send + 'static,
) -> PendingWrite {
    let start_label = label.clone();
    PendingWrite::Deferred {
        label,
        start: Box::new(move |done| {
            let state = Arc::new(Mutex::new(Some((done, make))));
            let on_cancel: MergedCancel = {
                let state = Arc::clone(&state);
                Arc::new(move |err: &BackendError| {
                    if let Some((done, _)) = state.lock().unwrap().take() {
                        done(Err(vec![err.clone().into()]));
                    }
                })
            };
            let kind = Arc::clone(record.kind_arc());
            let on_value: MergedCallback = Arc::new(move |snapshot: &MergedSnapshot, _: Option<&str>| {
                let Some((done, make)) = state.lock().unwrap().take() else {
                    return;
                };
                let raw = kind.get_child_snaps(snapshot.raw(), &alias);
                let Some(located) = raw.iter().next().map(|raw| &raw.snapshot) else {
                    warn!(field = %start_label, "skipping write, field location unresolved");
                    done(Ok(()));
                    return;
                };
                let mut reference = located.reference();
                if !subpath.is_empty() {
                    reference = reference.child(&subpath.join("/"));
                }
                execute(
                    vec![make(reference)],
                    Some(Box::new(move |result: WriteResult| done(result))),
                );
            });
            record.track_once(EventType::Value, on_value, Some(on_cancel));
        }),
    }
}

impl RecordBehavior for RecordField {
    fn has_child(&self, raw: &RawSnapshots, key: &str) -> bool {
        self.snapshot(raw)
            .is_some_and(|snapshot| snapshot.has_child(key))
    }

    fn for_each_key(&self, raw: &RawSnapshots, f: &mut dyn FnMut(&str) -> bool) -> bool {
        let Some(snapshot) = self.snapshot(raw) else {
            return false;
        };
        for key in snapshot.child_keys() {
            if f(&key) {
                return true;
            }
        }
        false
    }

    fn get_child_snaps(&self, raw: &RawSnapshots, key: &str) -> RawSnapshots {
        self.snapshot(raw)
            .map(|snapshot| RawSnapshots::single(&self.path, snapshot.child(key)))
            .unwrap_or_default()
    }

    fn merge_data(&self, raw: &RawSnapshots, export: bool) -> Value {
        match self.snapshot(raw) {
            Some(snapshot) if export => snapshot.export_val(),
            Some(snapshot) => snapshot.val(),
            None => Value::Null,
        }
    }

    fn get_priority(&self, raw: &RawSnapshots) -> Value {
        self.snapshot(raw)
            .map(DataSnapshot::priority)
            .unwrap_or(Value::Null)
    }

    fn make_child(&self, key: &str, _node: &RecordNode) -> RecordKind {
        RecordKind::Field(self.child_of(key))
    }

    fn save_data(&self, value: Value, mode: WriteMode) -> Result<Vec<PendingWrite>, RecordError> {
        self.check_writable()?;
        let write = match mode {
            WriteMode::Set => self.write_to(move |reference| PendingWrite::Set { reference, value }),
            WriteMode::Update => {
                let Value::Object(values) = value else {
                    return Err(RecordError::UpdateRequiresObject {
                        target: self.describe(),
                    });
                };
                self.write_to(move |reference| PendingWrite::Update { reference, values })
            }
        };
        Ok(vec![write])
    }

    fn save_priority(&self, priority: Value) -> Result<Vec<PendingWrite>, RecordError> {
        self.check_writable()?;
        Ok(vec![self.write_to(move |reference| {
            PendingWrite::SetPriority {
                reference,
                priority,
            }
        })])
    }

    fn key(&self) -> String {
        self.key.clone()
    }

    fn describe(&self) -> String {
        match &self.target {
            FieldTarget::Static(reference) => reference.url(),
            FieldTarget::Dynamic {
                record,
                alias,
                subpath,
            } => {
                let mut out = format!("{}/{}", record.describe(), alias);
                for key in subpath {
                    out.push('/');
                    out.push_str(key);
                }
                out
            }
        }
    }
}
