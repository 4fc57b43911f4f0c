//! Durable Queue Store
//!
//! Dual-backed persistence for the pending mutation queue: a fast
//! synchronous snapshot for immediate availability, and a durable table
//! reachable by the background execution context. After reconciliation the
//! fast store is the authoritative superset; a task absent from the fast
//! store is deleted regardless of durable-store state.

pub mod durable;
pub mod fast;
pub mod mirror;

pub use durable::SledTaskStore;
pub use fast::{FastStore, NetworkStatus};
pub use mirror::RecordMirror;

use crate::error::StorageError;
use crate::task::Task;
use crate::types::TaskId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merge two queue snapshots into one view.
///
/// Pure function of its inputs: every fast-store member is kept in order,
/// durable-only members are appended in their own order, and on id collision
/// the fast instance wins wholesale — which also settles retry-count
/// disagreements in favor of the fast store.
pub fn merge_snapshots(fast: &[Task], durable: &[Task]) -> Vec<Task> {
    let fast_ids: HashSet<TaskId> = fast.iter().map(|t| t.id).collect();
    let mut merged = fast.to_vec();
    merged.extend(durable.iter().filter(|t| !fast_ids.contains(&t.id)).cloned());
    merged
}

/// The dual-backed queue store.
pub struct QueueStore {
    fast: FastStore,
    durable: Arc<SledTaskStore>,
    /// Set when a durable write failed; the backlog is retried on the next
    /// mutation.
    durable_dirty: AtomicBool,
}

impl QueueStore {
    pub fn new(fast: FastStore, durable: SledTaskStore) -> Self {
        Self {
            fast,
            durable: Arc::new(durable),
            durable_dirty: AtomicBool::new(false),
        }
    }

    /// The durable table, for contexts that drain it directly.
    pub fn durable(&self) -> Arc<SledTaskStore> {
        Arc::clone(&self.durable)
    }

    /// Append a task to both stores.
    ///
    /// The fast store is authoritative: a durable write failure leaves the
    /// task queued and the durable copy is retried on the next mutation.
    pub fn enqueue(&self, task: Task) -> Result<(), StorageError> {
        self.retry_durable_backlog();
        self.fast.push_task(task.clone())?;
        if let Err(err) = self.durable.put(&task) {
            warn!(task_id = %task.id, error = %err, "durable store write failed; continuing fast-only");
            self.durable_dirty.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Remove a task from both stores. Removing an absent id is a no-op.
    ///
    /// A durable removal failure cannot resurrect the task: fast-store
    /// absence wins in the merged view.
    pub fn dequeue(&self, id: TaskId) -> Result<bool, StorageError> {
        self.retry_durable_backlog();
        let removed = self.fast.remove_task(id)?;
        if let Err(err) = self.durable.remove(id) {
            warn!(task_id = %id, error = %err, "durable store removal failed; fast-store absence wins");
        }
        Ok(removed)
    }

    /// Current merged view, FIFO.
    pub fn list(&self) -> Vec<Task> {
        self.fast.tasks()
    }

    pub fn is_empty(&self) -> bool {
        self.fast.tasks().is_empty()
    }

    /// Reconcile the fast snapshot with the durable table.
    ///
    /// Tasks present only in the durable table are appended to the merged
    /// view and the merge is persisted back to the fast store; fast-only
    /// tasks are opportunistically written back to the durable table.
    /// Returns how many tasks were recovered from the durable side.
    pub fn reconcile(&self) -> Result<usize, StorageError> {
        let durable_tasks = match self.durable.list_all() {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "durable store unavailable; skipping reconciliation");
                return Ok(0);
            }
        };
        let fast_tasks = self.fast.tasks();
        let merged = merge_snapshots(&fast_tasks, &durable_tasks);
        let recovered = merged.len() - fast_tasks.len();
        if recovered > 0 {
            self.fast.replace_tasks(merged.clone())?;
            debug!(recovered, "recovered tasks from the durable store");
        }

        let durable_ids: HashSet<TaskId> = durable_tasks.iter().map(|t| t.id).collect();
        for task in merged.iter().filter(|t| !durable_ids.contains(&t.id)) {
            if let Err(err) = self.durable.put(task) {
                warn!(task_id = %task.id, error = %err, "durable write-back failed during reconciliation");
                self.durable_dirty.store(true, Ordering::Relaxed);
                break;
            }
        }
        Ok(recovered)
    }

    /// Record a retry attempt against both stores.
    ///
    /// The fast store's value is authoritative when the two disagree; the
    /// durable copy is best effort.
    pub fn record_retry(&self, id: TaskId, retry_count: u32) -> Result<(), StorageError> {
        if !self.fast.set_retry_count(id, retry_count)? {
            return Ok(());
        }
        match self.durable.get(id) {
            Ok(Some(mut task)) => {
                task.retry_count = retry_count;
                if let Err(err) = self.durable.put(&task) {
                    warn!(task_id = %id, error = %err, "durable retry-count update failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(task_id = %id, error = %err, "durable retry-count lookup failed");
            }
        }
        Ok(())
    }

    /// Record ids (temp or server-assigned) touched by queued tasks, for
    /// hosts that badge pending rows.
    pub fn pending_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for task in self.fast.tasks() {
            if let Some(temp) = task.temp_id() {
                ids.insert(temp.to_string());
            }
            if let Some(embedded) = task.payload.get("id") {
                match embedded {
                    serde_json::Value::String(s) => {
                        ids.insert(s.clone());
                    }
                    serde_json::Value::Number(n) => {
                        ids.insert(n.to_string());
                    }
                    _ => {}
                }
            }
            if let Some(target) = task.target_id() {
                ids.insert(target.to_string());
            }
        }
        ids
    }

    pub fn last_sync_time(&self) -> Option<u64> {
        self.fast.last_sync_time()
    }

    pub fn set_last_sync_time(&self, millis: u64) -> Result<(), StorageError> {
        self.fast.set_last_sync_time(millis)
    }

    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.fast.network_status()
    }

    pub fn set_network_status(&self, online: bool) -> Result<(), StorageError> {
        self.fast.set_network_status(online)
    }

    /// Re-push the fast snapshot into the durable table after a failed
    /// durable write.
    fn retry_durable_backlog(&self) {
        if !self.durable_dirty.swap(false, Ordering::Relaxed) {
            return;
        }
        for task in self.fast.tasks() {
            if let Err(err) = self.durable.put(&task) {
                warn!(task_id = %task.id, error = %err, "durable backlog retry failed");
                self.durable_dirty.store(true, Ordering::Relaxed);
                return;
            }
        }
        debug!("durable backlog flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use serde_json::json;
    use tempfile::TempDir;

    fn queue_store(dir: &TempDir) -> QueueStore {
        let fast = FastStore::open(dir.path().join("queue.json")).unwrap();
        let durable = SledTaskStore::open(dir.path().join("tasks.sled")).unwrap();
        QueueStore::new(fast, durable)
    }

    fn task(n: u64) -> Task {
        Task::new(Action::Create, "/widgets", json!({ "n": n }))
    }

    #[test]
    fn merge_appends_durable_only_members() {
        let a = task(1);
        let b = task(2);
        let c = task(3);

        let merged = merge_snapshots(&[a.clone(), b.clone()], &[b.clone(), c.clone()]);
        let ids: Vec<_> = merged.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn merge_prefers_the_fast_instance_on_collision() {
        let mut fast_copy = task(1);
        fast_copy.retry_count = 2;
        let mut durable_copy = fast_copy.clone();
        durable_copy.retry_count = 5;

        let merged = merge_snapshots(&[fast_copy.clone()], &[durable_copy]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].retry_count, 2);
    }

    #[test]
    fn enqueue_writes_both_stores() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        let t = task(1);
        store.enqueue(t.clone()).unwrap();

        assert_eq!(store.list(), vec![t.clone()]);
        assert_eq!(store.durable().get(t.id).unwrap(), Some(t));
    }

    #[test]
    fn dequeue_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        let t = task(1);
        store.enqueue(t.clone()).unwrap();

        assert!(store.dequeue(t.id).unwrap());
        assert!(!store.dequeue(t.id).unwrap());
        assert!(store.is_empty());
        assert!(store.durable().get(t.id).unwrap().is_none());
    }

    #[test]
    fn reconcile_recovers_durable_only_tasks_and_persists_the_merge() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        let a = task(1);
        let orphan = task(2);
        store.enqueue(a.clone()).unwrap();
        // A task enqueued by another context lands only in the durable table.
        store.durable().put(&orphan).unwrap();

        let recovered = store.reconcile().unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(store.list(), vec![a, orphan.clone()]);

        // The merge is persisted: a reopened fast store sees it.
        let reopened = FastStore::open(dir.path().join("queue.json")).unwrap();
        assert!(reopened.tasks().iter().any(|t| t.id == orphan.id));
    }

    #[test]
    fn reconcile_writes_fast_only_tasks_back_to_durable() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        let t = task(1);
        store.enqueue(t.clone()).unwrap();
        // Simulate an earlier durable write failure.
        store.durable().remove(t.id).unwrap();

        store.reconcile().unwrap();
        assert_eq!(store.durable().get(t.id).unwrap(), Some(t));
    }

    #[test]
    fn record_retry_updates_both_stores() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        let t = task(1);
        store.enqueue(t.clone()).unwrap();
        store.record_retry(t.id, 3).unwrap();

        assert_eq!(store.list()[0].retry_count, 3);
        assert_eq!(store.durable().get(t.id).unwrap().unwrap().retry_count, 3);
    }

    #[test]
    fn pending_ids_cover_temp_payload_and_endpoint_ids() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);

        store
            .enqueue(Task::new(
                Action::Create,
                "/widgets",
                json!({"name": "x", "tempId": "temp_7"}),
            ))
            .unwrap();
        store
            .enqueue(Task::new(
                Action::Update,
                "/widgets/42",
                json!({"id": 42, "name": "y"}),
            ))
            .unwrap();

        let ids = store.pending_ids();
        assert!(ids.contains("temp_7"));
        assert!(ids.contains("42"));
    }
}
