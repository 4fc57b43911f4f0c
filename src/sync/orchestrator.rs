//! Sync orchestrator: one drain cycle at a time against the remote service.
//!
//! State machine per context: Idle → Draining → Idle, re-entrant across
//! cycles. The Draining entry is guarded by queue non-emptiness, the absence
//! of an active session in this context, and the debounce window. Tasks are
//! independent failure domains: one task failing never halts the drain.

use crate::coordinator::{CoordinatorBus, SyncSignal, TaskOutcome, UserNotice};
use crate::remote::RemoteService;
use crate::store::{QueueStore, RecordMirror};
use crate::sync::outbound_payload;
use crate::task::Task;
use crate::types::now_millis;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Totals for one completed drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks executed and dequeued
    pub executed: usize,
    /// Tasks that failed transiently and stay queued
    pub failed: usize,
    /// Tasks dropped after the retry ceiling or a server rejection
    pub abandoned: usize,
}

/// Why a drain did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    QueueEmpty,
    AlreadyDraining,
    Debounced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    Skipped(SkipReason),
}

/// Ephemeral record of one in-flight drain. Created when a drain begins,
/// dropped when it finishes; at most one per context.
struct SyncSession {
    started_at: Instant,
}

pub struct SyncOrchestrator {
    store: Arc<QueueStore>,
    remote: Arc<dyn RemoteService>,
    mirror: Arc<RecordMirror>,
    bus: CoordinatorBus,
    retry_ceiling: u32,
    debounce: Duration,
    records_endpoint: String,
    draining: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<QueueStore>,
        remote: Arc<dyn RemoteService>,
        mirror: Arc<RecordMirror>,
        bus: CoordinatorBus,
        retry_ceiling: u32,
        debounce: Duration,
        records_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            mirror,
            bus,
            retry_ceiling,
            debounce,
            records_endpoint: records_endpoint.into(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Attempt one full drain cycle. Guard misses are outcomes, not errors.
    pub async fn drain(&self) -> DrainOutcome {
        if self.store.is_empty() {
            return DrainOutcome::Skipped(SkipReason::QueueEmpty);
        }
        if self.debounced() {
            debug!("drain skipped: within the debounce window of the last sync");
            return DrainOutcome::Skipped(SkipReason::Debounced);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return DrainOutcome::Skipped(SkipReason::AlreadyDraining);
        }

        let session = SyncSession {
            started_at: Instant::now(),
        };
        self.bus.emit(SyncSignal::Notice(UserNotice::Synchronizing));
        let report = self.run_drain().await;

        if let Err(err) = self.store.set_last_sync_time(now_millis()) {
            warn!(error = %err, "failed to persist last sync time");
        }
        self.bus.emit(SyncSignal::Notice(UserNotice::SyncComplete));
        self.refresh_mirror().await;
        self.draining.store(false, Ordering::SeqCst);

        info!(
            executed = report.executed,
            failed = report.failed,
            abandoned = report.abandoned,
            duration_ms = session.started_at.elapsed().as_millis() as u64,
            "drain cycle completed"
        );
        DrainOutcome::Completed(report)
    }

    async fn run_drain(&self) -> DrainReport {
        // Snapshot at drain start; tasks enqueued mid-drain wait for the
        // next cycle.
        let snapshot = self.store.list();
        let mut report = DrainReport::default();

        for task in snapshot {
            debug!(task_id = %task.id, action = %task.action, "executing queued task");
            match self
                .remote
                .execute(task.action, &task.endpoint, outbound_payload(&task).as_ref())
                .await
            {
                Ok(_) => {
                    if let Err(err) = self.store.dequeue(task.id) {
                        warn!(task_id = %task.id, error = %err, "failed to dequeue executed task");
                    }
                    self.bus.emit(SyncSignal::TaskSynced {
                        id: task.id,
                        outcome: TaskOutcome::Completed,
                    });
                    report.executed += 1;
                }
                Err(err) if !err.is_retryable() => {
                    warn!(task_id = %task.id, error = %err, "mutation rejected; abandoning immediately");
                    self.abandon(&task);
                    report.abandoned += 1;
                }
                Err(err) => {
                    let attempts = task.retry_count + 1;
                    warn!(
                        task_id = %task.id,
                        attempt = attempts,
                        error = %err,
                        "task delivery failed"
                    );
                    if let Err(err) = self.store.record_retry(task.id, attempts) {
                        warn!(task_id = %task.id, error = %err, "failed to record retry");
                    }
                    if attempts > self.retry_ceiling {
                        self.abandon(&task);
                        report.abandoned += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Surface the failure and drop the task; abandoned tasks are never
    /// retried.
    fn abandon(&self, task: &Task) {
        warn!(
            task_id = %task.id,
            action = %task.action,
            retry_count = task.retry_count,
            "abandoning task"
        );
        if let Err(err) = self.store.dequeue(task.id) {
            warn!(task_id = %task.id, error = %err, "failed to dequeue abandoned task");
        }
        self.bus.emit(SyncSignal::Notice(UserNotice::TaskAbandoned {
            id: task.id,
            action: task.action,
        }));
        self.bus.emit(SyncSignal::TaskSynced {
            id: task.id,
            outcome: TaskOutcome::Abandoned,
        });
    }

    /// Refresh the local mirror from the server after a drain. Best effort.
    async fn refresh_mirror(&self) {
        match self.remote.fetch(&self.records_endpoint).await {
            Ok(envelope) => {
                if let Some(Value::Array(records)) = envelope.data {
                    if let Err(err) = self.mirror.replace_all(records) {
                        warn!(error = %err, "failed to persist refreshed mirror");
                    }
                }
            }
            Err(err) => warn!(error = %err, "mirror refresh failed after drain"),
        }
    }

    fn debounced(&self) -> bool {
        match self.store.last_sync_time() {
            Some(last) => now_millis().saturating_sub(last) < self.debounce.as_millis() as u64,
            None => false,
        }
    }
}
