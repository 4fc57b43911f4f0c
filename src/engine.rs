//! Process composition root.
//!
//! One explicitly constructed engine per process: dependency-injected
//! collaborators, `init()` on startup, no teardown needed beyond process
//! exit. Multiple isolated instances can coexist in one test process.

use crate::config::TetherConfig;
use crate::coordinator::{CoordinatorBus, SyncSignal};
use crate::error::SyncError;
use crate::facade::RequestFacade;
use crate::monitor::{ConnectivityMonitor, MonitorConfig, ReachabilityProbe, StaticProbe, Transition};
use crate::remote::{HttpRemoteService, RemoteService};
use crate::store::{FastStore, QueueStore, RecordMirror, SledTaskStore};
use crate::sync::{BackgroundSyncWorker, SyncOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long to defer the startup drain so the rest of the process can
/// finish wiring.
const STARTUP_DRAIN_DEFER: Duration = Duration::from_millis(500);

pub struct SyncEngine {
    store: Arc<QueueStore>,
    mirror: Arc<RecordMirror>,
    monitor: Arc<ConnectivityMonitor>,
    orchestrator: Arc<SyncOrchestrator>,
    facade: Arc<RequestFacade>,
    background: Option<Arc<BackgroundSyncWorker>>,
    bus: CoordinatorBus,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Construct and wire the engine with production collaborators.
    ///
    /// Must be called within a tokio runtime: the monitor poll, the drain
    /// loop, and the background worker are spawned here.
    pub fn init(config: TetherConfig) -> Result<Self, SyncError> {
        let remote: Arc<dyn RemoteService> = Arc::new(HttpRemoteService::new(&config.remote)?);
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(StaticProbe::new(true));
        Self::init_with(config, remote, probe)
    }

    /// Construct with an injected remote service and reachability probe.
    pub fn init_with(
        config: TetherConfig,
        remote: Arc<dyn RemoteService>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self, SyncError> {
        let fast = FastStore::open(config.storage.fast_store_path())?;
        let durable = SledTaskStore::open(config.storage.durable_store_path())?;
        let store = Arc::new(QueueStore::new(fast, durable));
        let mirror = Arc::new(RecordMirror::open(config.storage.mirror_path())?);
        let bus = CoordinatorBus::default();

        let monitor = Arc::new(ConnectivityMonitor::new(
            probe.clone(),
            store.clone(),
            bus.clone(),
            MonitorConfig::from(&config.sync),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            remote.clone(),
            mirror.clone(),
            bus.clone(),
            config.sync.retry_ceiling,
            config.sync.online_debounce(),
            config.remote.records_endpoint.clone(),
        ));
        let facade = Arc::new(RequestFacade::new(
            remote.clone(),
            store.clone(),
            mirror.clone(),
            monitor.clone(),
            bus.clone(),
        ));
        let background = config.sync.background_sync.then(|| {
            Arc::new(BackgroundSyncWorker::new(
                store.durable(),
                remote,
                probe.clone(),
                bus.clone(),
                config.sync.retry_ceiling,
                config.sync.background_interval(),
            ))
        });

        let mut tasks = Vec::new();

        // The fast snapshot is available immediately; the durable table is
        // reconciled into it off the startup path.
        tasks.push(tokio::spawn({
            let store = store.clone();
            async move {
                match store.reconcile() {
                    Ok(recovered) if recovered > 0 => {
                        info!(recovered, "reconciled tasks from the durable store")
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "startup reconciliation failed"),
                }
            }
        }));

        tasks.push(monitor.spawn_poll());
        tasks.push(tokio::spawn(drain_loop(
            monitor.subscribe(),
            orchestrator.clone(),
        )));
        tasks.push(tokio::spawn(signal_loop(
            bus.subscribe(),
            store.clone(),
            monitor.clone(),
        )));

        // Reachable at startup with queued work: drain once the wiring has
        // settled, unless a pre-reload drain makes it redundant.
        if probe.is_reachable() && !store.is_empty() {
            tasks.push(tokio::spawn({
                let monitor = monitor.clone();
                let orchestrator = orchestrator.clone();
                async move {
                    tokio::time::sleep(STARTUP_DRAIN_DEFER).await;
                    if !monitor.online_suppressed() {
                        let _ = orchestrator.drain().await;
                    }
                }
            }));
        }

        if let Some(worker) = &background {
            worker.start();
        }

        Ok(Self {
            store,
            mirror,
            monitor,
            orchestrator,
            facade,
            background,
            bus,
            tasks,
        })
    }

    pub fn facade(&self) -> Arc<RequestFacade> {
        self.facade.clone()
    }

    pub fn monitor(&self) -> Arc<ConnectivityMonitor> {
        self.monitor.clone()
    }

    pub fn store(&self) -> Arc<QueueStore> {
        self.store.clone()
    }

    pub fn mirror(&self) -> Arc<RecordMirror> {
        self.mirror.clone()
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn background(&self) -> Option<Arc<BackgroundSyncWorker>> {
        self.background.clone()
    }

    /// Observer interface for hosts: queue changes, task completions,
    /// connectivity changes, user-facing notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.bus.subscribe()
    }

    /// Stop the spawned loops. Only needed when tearing an engine down
    /// before process exit (tests, mostly).
    pub async fn shutdown(&mut self) {
        if let Some(worker) = &self.background {
            worker.stop().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Drain on every debounced online transition. Only the page-context
/// orchestrator reacts to transitions; the background worker keeps to its
/// own schedule so at most one of the two drains per transition.
async fn drain_loop(
    mut transitions: broadcast::Receiver<Transition>,
    orchestrator: Arc<SyncOrchestrator>,
) {
    loop {
        match transitions.recv().await {
            Ok(Transition::Online) => {
                let _ = orchestrator.drain().await;
            }
            Ok(Transition::Offline) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Converge on cross-context signals: drop tasks another context synced,
/// and fold observed network transitions into the monitor.
async fn signal_loop(
    mut signals: broadcast::Receiver<SyncSignal>,
    store: Arc<QueueStore>,
    monitor: Arc<ConnectivityMonitor>,
) {
    loop {
        match signals.recv().await {
            Ok(SyncSignal::TaskSynced { id, .. }) => {
                // Idempotent: the task may already be gone from this
                // context's stores.
                if let Err(err) = store.dequeue(id) {
                    warn!(task_id = %id, error = %err, "failed to drop synced task");
                }
            }
            Ok(SyncSignal::NetworkStatusChanged { online }) => {
                monitor.observe_broadcast(online);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> TetherConfig {
        TetherConfig {
            storage: StorageConfig {
                data_dir: dir.path().to_path_buf(),
                ..StorageConfig::default()
            },
            ..TetherConfig::default()
        }
    }

    #[tokio::test]
    async fn isolated_engines_coexist_in_one_process() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let mut engine_a = SyncEngine::init(config_in(&dir_a)).unwrap();
        let mut engine_b = SyncEngine::init(config_in(&dir_b)).unwrap();

        assert!(engine_a.store().is_empty());
        assert!(engine_b.store().is_empty());

        engine_a.shutdown().await;
        engine_b.shutdown().await;
    }
}
