//! Durable task table, reachable by the background execution context.
//!
//! Sled-backed, keyed by big-endian task id so key-ordered iteration is FIFO
//! iteration. Values are the JSON encoding of the task.

use crate::error::StorageError;
use crate::task::Task;
use crate::types::TaskId;
use sled;
use std::path::Path;

/// Sled-backed durable store for pending tasks.
pub struct SledTaskStore {
    db: sled::Db,
}

impl SledTaskStore {
    /// Open (or create) the task table at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)
            .map_err(|e| StorageError::Backend(format!("failed to open task table: {}", e)))?;
        Ok(Self { db })
    }

    /// Insert or overwrite a task.
    pub fn put(&self, task: &Task) -> Result<(), StorageError> {
        let value = serde_json::to_vec(task)
            .map_err(|e| StorageError::Corrupt(format!("failed to encode task: {}", e)))?;
        self.db
            .insert(task.id.to_key_bytes(), value)
            .map_err(|e| StorageError::Backend(format!("failed to store task: {}", e)))?;
        self.flush()
    }

    pub fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        match self
            .db
            .get(id.to_key_bytes())
            .map_err(|e| StorageError::Backend(format!("failed to read task: {}", e)))?
        {
            Some(value) => {
                let task = serde_json::from_slice(&value)
                    .map_err(|e| StorageError::Corrupt(format!("failed to decode task: {}", e)))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Remove a task by id. Removing an absent id is a no-op.
    pub fn remove(&self, id: TaskId) -> Result<(), StorageError> {
        self.db
            .remove(id.to_key_bytes())
            .map_err(|e| StorageError::Backend(format!("failed to remove task: {}", e)))?;
        self.flush()
    }

    /// All tasks in FIFO (id) order.
    ///
    /// Undecodable entries are skipped rather than failing the whole scan; a
    /// single corrupt row must not wedge the queue.
    pub fn list_all(&self) -> Result<Vec<Task>, StorageError> {
        let mut tasks = Vec::new();
        for item in self.db.iter() {
            let (_key, value) = item
                .map_err(|e| StorageError::Backend(format!("failed to iterate tasks: {}", e)))?;
            match serde_json::from_slice::<Task>(&value) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable task entry");
                }
            }
        }
        Ok(tasks)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::Backend(format!("failed to flush task table: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = SledTaskStore::open(dir.path()).unwrap();

        let task = Task::new(Action::Create, "/widgets", json!({"name": "x"}));
        store.put(&task).unwrap();

        let loaded = store.get(task.id).unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(loaded.payload, task.payload);
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = SledTaskStore::open(dir.path()).unwrap();
        assert!(store.get(TaskId::next()).unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = SledTaskStore::open(dir.path()).unwrap();

        let task = Task::new(Action::Delete, "/widgets/1", json!({}));
        store.put(&task).unwrap();
        store.remove(task.id).unwrap();
        assert!(store.get(task.id).unwrap().is_none());

        // Removing again never raises.
        store.remove(task.id).unwrap();
    }

    #[test]
    fn list_all_is_fifo_by_id() {
        let dir = TempDir::new().unwrap();
        let store = SledTaskStore::open(dir.path()).unwrap();

        let first = Task::new(Action::Create, "/widgets", json!({"n": 1}));
        let second = Task::new(Action::Create, "/widgets", json!({"n": 2}));
        let third = Task::new(Action::Create, "/widgets", json!({"n": 3}));

        // Insert out of order; iteration must come back in id order.
        store.put(&third).unwrap();
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let ids: Vec<_> = store.list_all().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn tasks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let task = Task::new(Action::Update, "/widgets/9", json!({"name": "y"}));
        {
            let store = SledTaskStore::open(dir.path()).unwrap();
            store.put(&task).unwrap();
        }
        let reopened = SledTaskStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_all().unwrap(), vec![task]);
    }
}
