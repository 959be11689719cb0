//! The set level: every record of the collection, keyed by master key.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::debug;

use super::{
    MergeContext, PendingWrite, RawSnapshots, Record, RecordBehavior, RecordError, RecordKind,
    RecordNode, WriteMode, WriteResult, execute,
};
use crate::backend::{BackendError, CancelCallback, EventType};
use crate::data::DataSnapshot;

#[derive(Debug, Clone)]
pub(crate) struct RecordSet {
    context: MergeContext,
}

impl RecordSet {
    pub(crate) fn new(context: MergeContext) -> Self {
        Self { context }
    }

    pub(crate) fn context(&self) -> &MergeContext {
        &self.context
    }

    fn record(&self, key: &str) -> Record {
        Record::new(self.context.clone(), key)
    }

    fn master<'a>(&self, raw: &'a RawSnapshots) -> Option<&'a DataSnapshot> {
        raw.get(self.context.master_alias())
    }

    /// The record snapshot of path `alias` for record `id`, following the
    /// dependency chain through the set snapshots.
    fn resolve_child(&self, raw: &RawSnapshots, alias: &str, id: &str) -> Option<DataSnapshot> {
        match self.context.paths.dependency_of(alias) {
            None => Some(raw.get(alias)?.child(id)),
            Some(dependency) => {
                let parent = self.resolve_child(raw, &dependency.path, id)?;
                let key = dependency.resolve_key(&parent)?;
                Some(raw.get(alias)?.child(&key))
            }
        }
    }

    fn remove_all(&self) -> PendingWrite {
        let context = self.context.clone();
        let master = context.paths.master().reference().clone();
        PendingWrite::Deferred {
            label: self.describe(),
            start: Box::new(move |done| {
                let done = Arc::new(Mutex::new(Some(done)));
                let on_cancel: CancelCallback = {
                    let done = Arc::clone(&done);
                    Arc::new(move |err: &BackendError| {
                        if let Some(done) = done.lock().unwrap().take() {
                            done(Err(vec![err.clone().into()]));
                        }
                    })
                };
                master.once(
                    EventType::Value,
                    Arc::new(move |snapshot: &DataSnapshot, _: Option<&str>| {
                        let Some(done) = done.lock().unwrap().take() else {
                            return;
                        };
                        let mut writes = Vec::new();
                        for key in snapshot.child_keys() {
                            match Record::new(context.clone(), &key)
                                .save_data(Value::Null, WriteMode::Set)
                            {
                                Ok(more) => writes.extend(more),
                                Err(err) => return done(Err(vec![err.into()])),
                            }
                        }
                        debug!(records = snapshot.num_children(), "removing merged set");
                        execute(
                            writes,
                            Some(Box::new(move |result: WriteResult| done(result))),
                        );
                    }),
                    Some(on_cancel),
                );
            }),
        }
    }

    fn bracketed<I: IntoIterator<Item = String>>(parts: I) -> String {
        parts
            .into_iter()
            .map(|part| format!("[{part}]"))
            .collect()
    }
}

impl RecordBehavior for RecordSet {
    fn has_child(&self, raw: &RawSnapshots, key: &str) -> bool {
        self.master(raw).is_some_and(|master| master.has_child(key))
    }

    fn for_each_key(&self, raw: &RawSnapshots, f: &mut dyn FnMut(&str) -> bool) -> bool {
        let Some(master) = self.master(raw) else {
            return false;
        };
        for key in master.child_keys() {
            if f(&key) {
                return true;
            }
        }
        false
    }

    fn get_child_snaps(&self, raw: &RawSnapshots, key: &str) -> RawSnapshots {
        let mut out = RawSnapshots::new();
        for path in self.context.paths.paths() {
            if let Some(snapshot) = self.resolve_child(raw, path.name(), key) {
                out.push(path.name(), snapshot);
            }
        }
        out
    }

    fn merge_data(&self, raw: &RawSnapshots, export: bool) -> Value {
        if !self.master(raw).is_some_and(DataSnapshot::exists) {
            return Value::Null;
        }
        let mut out = Map::new();
        self.for_each_key(raw, &mut |key| {
            let child = self.get_child_snaps(raw, key);
            let record = self.record(key);
            let data = record.merge_data(&child, false);
            if data.is_null() {
                return false;
            }
            let priority = record.get_priority(&child);
            if !self.context.filter.test(&data, key, &priority) {
                return false;
            }
            let value = if export {
                record.merge_data(&child, true)
            } else {
                data
            };
            out.insert(key.to_string(), value);
            false
        });
        if out.is_empty() {
            Value::Null
        } else {
            Value::Object(out)
        }
    }

    fn get_priority(&self, _raw: &RawSnapshots) -> Value {
        Value::Null
    }

    fn make_child(&self, key: &str, _node: &RecordNode) -> RecordKind {
        RecordKind::Record(self.record(key))
    }

    fn save_data(&self, value: Value, mode: WriteMode) -> Result<Vec<PendingWrite>, RecordError> {
        match value {
            Value::Null => Ok(vec![self.remove_all()]),
            Value::Object(records) => {
                let mut writes = Vec::new();
                for (key, record) in records {
                    if crate::data::is_meta_key(&key) {
                        continue;
                    }
                    writes.extend(self.record(&key).save_data(record, mode)?);
                }
                Ok(writes)
            }
            _ => Err(RecordError::PrimitiveSplit {
                target: self.describe(),
            }),
        }
    }

    fn save_priority(&self, _priority: Value) -> Result<Vec<PendingWrite>, RecordError> {
        Err(RecordError::Unsupported {
            operation: "set_priority".to_string(),
            hint: "the merged set has no priority; prioritize individual records".to_string(),
        })
    }

    fn key(&self) -> String {
        let paths = self.context.paths.paths();
        if paths.len() == 1 {
            return paths[0].name().to_string();
        }
        Self::bracketed(paths.iter().map(|path| path.name().to_string()))
    }

    fn describe(&self) -> String {
        let paths = self.context.paths.paths();
        if paths.len() == 1 {
            return paths[0].url();
        }
        Self::bracketed(paths.iter().map(|path| path.url()))
    }
}
