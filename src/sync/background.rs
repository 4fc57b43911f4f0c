//! Background execution context.
//!
//! Owns an independent copy of the drain algorithm, reading the durable
//! table directly so queued work completes with no view open. Honors the
//! same retry ceiling as the page orchestrator and emits `TaskSynced` for
//! every completion so any active page context converges immediately.

use crate::coordinator::{CoordinatorBus, SyncSignal, TaskOutcome, UserNotice};
use crate::error::SyncError;
use crate::monitor::ReachabilityProbe;
use crate::remote::RemoteService;
use crate::store::SledTaskStore;
use crate::sync::orchestrator::DrainReport;
use crate::sync::outbound_payload;
use crate::task::Task;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct BackgroundSyncWorker {
    durable: Arc<SledTaskStore>,
    remote: Arc<dyn RemoteService>,
    probe: Arc<dyn ReachabilityProbe>,
    bus: CoordinatorBus,
    retry_ceiling: u32,
    interval: Duration,
    running: Arc<RwLock<bool>>,
    wake: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundSyncWorker {
    pub fn new(
        durable: Arc<SledTaskStore>,
        remote: Arc<dyn RemoteService>,
        probe: Arc<dyn ReachabilityProbe>,
        bus: CoordinatorBus,
        retry_ceiling: u32,
        interval: Duration,
    ) -> Self {
        Self {
            durable,
            remote,
            probe,
            bus,
            retry_ceiling,
            interval,
            running: Arc::new(RwLock::new(false)),
            wake: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Start the worker loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write();
            if *running {
                return;
            }
            *running = true;
        }
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run().await });
        *self.handle.lock() = Some(handle);
        info!("background sync worker started");
    }

    /// Stop the worker loop (graceful shutdown).
    pub async fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;
        }
        self.wake.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("background sync worker stopped");
    }

    /// Run a pass outside the regular schedule.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    async fn run(&self) {
        while *self.running.read() {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
            if !*self.running.read() {
                break;
            }
            if !self.probe.is_reachable() {
                continue;
            }
            match self.run_once().await {
                Ok(report) if report.executed + report.abandoned > 0 => {
                    debug!(
                        executed = report.executed,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        "background drain pass completed"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "background drain pass failed"),
            }
        }
    }

    /// One drain pass over the durable table, FIFO.
    pub async fn run_once(&self) -> Result<DrainReport, SyncError> {
        let tasks = self.durable.list_all()?;
        let mut report = DrainReport::default();

        for mut task in tasks {
            match self
                .remote
                .execute(task.action, &task.endpoint, outbound_payload(&task).as_ref())
                .await
            {
                Ok(_) => {
                    if let Err(err) = self.durable.remove(task.id) {
                        warn!(task_id = %task.id, error = %err, "failed to remove synced task");
                    }
                    self.bus.emit(SyncSignal::TaskSynced {
                        id: task.id,
                        outcome: TaskOutcome::Completed,
                    });
                    report.executed += 1;
                }
                Err(err) if !err.is_retryable() => {
                    warn!(task_id = %task.id, error = %err, "mutation rejected in background; abandoning");
                    self.abandon(&task);
                    report.abandoned += 1;
                }
                Err(err) => {
                    task.retry_count += 1;
                    warn!(
                        task_id = %task.id,
                        attempt = task.retry_count,
                        error = %err,
                        "background task delivery failed"
                    );
                    if task.retry_count > self.retry_ceiling {
                        self.abandon(&task);
                        report.abandoned += 1;
                    } else {
                        if let Err(err) = self.durable.put(&task) {
                            warn!(task_id = %task.id, error = %err, "failed to persist retry count");
                        }
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    fn abandon(&self, task: &Task) {
        if let Err(err) = self.durable.remove(task.id) {
            warn!(task_id = %task.id, error = %err, "failed to remove abandoned task");
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
}
