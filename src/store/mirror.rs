//! Local mirror of the last known remote record list.
//!
//! Best-effort cache used only for offline reads; overwritten wholesale on
//! every successful online read. Offline mutations are applied to it
//! optimistically so reads reflect what the user just did. Not part of the
//! sync engine's correctness.

use crate::error::StorageError;
use crate::task::Action;
use parking_lot::RwLock;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub struct RecordMirror {
    path: PathBuf,
    records: RwLock<Vec<Value>>,
}

impl RecordMirror {
    /// Open the mirror file, starting empty if absent or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(Value::Array(records)) => records,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "mirror file unreadable; starting empty");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StorageError::IoError(err)),
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn records(&self) -> Vec<Value> {
        self.records.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Overwrite the whole mirror with a fresh server read.
    pub fn replace_all(&self, records: Vec<Value>) -> Result<(), StorageError> {
        let mut guard = self.records.write();
        *guard = records;
        self.persist(&guard)
    }

    /// Apply an offline mutation optimistically so reads reflect it.
    pub fn apply_optimistic(
        &self,
        action: Action,
        record_id: &str,
        payload: &Value,
    ) -> Result<(), StorageError> {
        let mut guard = self.records.write();
        match action {
            Action::Create => {
                let mut record = payload.clone();
                if let Some(map) = record.as_object_mut() {
                    map.insert("id".to_string(), Value::String(record_id.to_string()));
                }
                guard.push(record);
            }
            Action::Update => {
                if let Some(existing) = guard.iter_mut().find(|r| id_matches(r, record_id)) {
                    merge_fields(existing, payload);
                }
            }
            Action::Delete => {
                guard.retain(|r| !id_matches(r, record_id));
            }
        }
        self.persist(&guard)
    }

    fn persist(&self, records: &[Value]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string(records)
            .map_err(|e| StorageError::Corrupt(format!("failed to encode mirror: {}", e)))?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}

/// Record ids may be server integers or temp strings; compare their string
/// forms.
fn id_matches(record: &Value, id: &str) -> bool {
    match record.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

fn merge_fields(record: &mut Value, payload: &Value) {
    let (Some(target), Some(source)) = (record.as_object_mut(), payload.as_object()) else {
        return;
    };
    for (key, value) in source {
        if key == "id" {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}
