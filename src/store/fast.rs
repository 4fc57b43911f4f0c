//! Fast store: synchronous keyed snapshot backing the queue.
//!
//! Reads are served from memory; every write rewrites the snapshot file
//! synchronously, so a reload sees the last completed write. Holds the three
//! logical keys shared across contexts: the pending task list, the last sync
//! timestamp, and the network status tag.

use crate::error::StorageError;
use crate::task::Task;
use crate::types::{now_millis, TaskId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Connectivity tag persisted for cross-context signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub changed_at_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    pending_tasks: Vec<Task>,
    #[serde(default)]
    last_sync_time: Option<u64>,
    #[serde(default)]
    network_status: Option<NetworkStatus>,
}

/// Synchronous process-local store.
pub struct FastStore {
    path: PathBuf,
    state: RwLock<Snapshot>,
}

impl FastStore {
    /// Open the snapshot at `path`, creating an empty one if absent.
    ///
    /// A corrupt snapshot degrades to empty rather than failing startup;
    /// whatever the durable store still holds is recovered at reconciliation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "fast store snapshot corrupt; starting empty");
                    Snapshot::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(err) => return Err(StorageError::IoError(err)),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Current pending tasks, FIFO.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.read().pending_tasks.clone()
    }

    /// Replace the whole pending list (used when persisting a merge).
    pub fn replace_tasks(&self, tasks: Vec<Task>) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.pending_tasks = tasks;
        self.persist(&state)
    }

    /// Append one task.
    pub fn push_task(&self, task: Task) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.pending_tasks.push(task);
        self.persist(&state)
    }

    /// Remove a task by id. Removing an absent id is a no-op.
    ///
    /// Returns whether anything was removed.
    pub fn remove_task(&self, id: TaskId) -> Result<bool, StorageError> {
        let mut state = self.state.write();
        let before = state.pending_tasks.len();
        state.pending_tasks.retain(|t| t.id != id);
        if state.pending_tasks.len() == before {
            return Ok(false);
        }
        self.persist(&state)?;
        Ok(true)
    }

    /// Overwrite the retry count of a queued task.
    ///
    /// Returns whether the task was present.
    pub fn set_retry_count(&self, id: TaskId, retry_count: u32) -> Result<bool, StorageError> {
        let mut state = self.state.write();
        let Some(task) = state.pending_tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        task.retry_count = retry_count;
        self.persist(&state)?;
        Ok(true)
    }

    pub fn last_sync_time(&self) -> Option<u64> {
        self.state.read().last_sync_time
    }

    pub fn set_last_sync_time(&self, millis: u64) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.last_sync_time = Some(millis);
        self.persist(&state)
    }

    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.state.read().network_status.clone()
    }

    /// Record a connectivity transition, stamped with the current time.
    pub fn set_network_status(&self, online: bool) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.network_status = Some(NetworkStatus {
            online,
            changed_at_ms: now_millis(),
        });
        self.persist(&state)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string(state)
            .map_err(|e| StorageError::Corrupt(format!("failed to encode snapshot: {}", e)))?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}
