//! End-to-end offline flow: queue while unreachable, reconcile on
//! reconnect, converge across contexts.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether::config::{StorageConfig, TetherConfig};
use tether::engine::SyncEngine;
use tether::error::SyncError;
use tether::monitor::StaticProbe;
use tether::remote::{ApiEnvelope, RemoteService};
use tether::task::{Action, Task};
use tether::types::TempId;

#[derive(Debug, Clone, PartialEq)]
struct RecordedCall {
    action: Action,
    endpoint: String,
    payload: Option<Value>,
}

/// Remote double whose reachability is toggled alongside the probe.
struct FlippableRemote {
    reachable: Mutex<bool>,
    calls: Mutex<Vec<RecordedCall>>,
    fetches: Mutex<usize>,
}

impl FlippableRemote {
    fn new(reachable: bool) -> Self {
        Self {
            reachable: Mutex::new(reachable),
            calls: Mutex::new(Vec::new()),
            fetches: Mutex::new(0),
        }
    }

    fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock() = reachable;
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteService for FlippableRemote {
    async fn execute(
        &self,
        action: Action,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<ApiEnvelope, SyncError> {
        if !*self.reachable.lock() {
            return Err(SyncError::Unreachable("connection refused".into()));
        }
        self.calls.lock().push(RecordedCall {
            action,
            endpoint: endpoint.to_string(),
            payload: payload.cloned(),
        });
        Ok(ApiEnvelope {
            success: true,
            data: Some(json!({"id": 42, "name": "x"})),
            message: None,
            error: None,
        })
    }

    async fn fetch(&self, _endpoint: &str) -> Result<ApiEnvelope, SyncError> {
        if !*self.reachable.lock() {
            return Err(SyncError::Unreachable("connection refused".into()));
        }
        *self.fetches.lock() += 1;
        Ok(ApiEnvelope {
            success: true,
            data: Some(json!([{"id": 42, "name": "x"}])),
            message: None,
            error: None,
        })
    }
}

fn config_in(dir: &TempDir) -> TetherConfig {
    TetherConfig {
        storage: StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        },
        ..TetherConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

#[tokio::test]
async fn offline_create_is_replayed_on_reconnect() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(FlippableRemote::new(false));
    let probe = Arc::new(StaticProbe::new(false));
    let mut engine =
        SyncEngine::init_with(config_in(&dir), remote.clone(), probe.clone()).unwrap();

    // Offline: the mutation is queued and answered optimistically.
    let envelope = engine
        .facade()
        .mutate(Action::Create, "/widgets", json!({"name": "x"}))
        .await
        .unwrap();
    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["name"], "x");
    let temp_id = data["id"].as_str().unwrap().to_string();
    assert!(TempId::is_temp(&temp_id));

    let queued = engine.store().list();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].temp_id(), Some(temp_id.as_str()));

    // Reconnect: the monitor transition triggers a drain.
    remote.set_reachable(true);
    probe.set_reachable(true);
    engine.monitor().notify_platform_online();

    let store = engine.store();
    wait_until(move || store.is_empty()).await;

    // The create went out with the action-appropriate verb and no tempId.
    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].action, Action::Create);
    assert_eq!(calls[0].endpoint, "/widgets");
    assert_eq!(calls[0].payload, Some(json!({"name": "x"})));

    // And the local mirror was refreshed from the server.
    let mirror = engine.mirror();
    wait_until(move || mirror.records() == vec![json!({"id": 42, "name": "x"})]).await;

    engine.shutdown().await;
}

#[tokio::test]
async fn rapid_reconnect_events_trigger_only_one_drain() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(FlippableRemote::new(false));
    let probe = Arc::new(StaticProbe::new(false));
    let mut engine =
        SyncEngine::init_with(config_in(&dir), remote.clone(), probe.clone()).unwrap();

    engine
        .facade()
        .mutate(Action::Create, "/widgets", json!({"name": "x"}))
        .await
        .unwrap();

    remote.set_reachable(true);
    probe.set_reachable(true);
    engine.monitor().notify_platform_online();

    let store = engine.store();
    wait_until(move || store.is_empty()).await;

    // A second task lands while the last drain is still fresh; a reconnect
    // event inside the debounce window must not start another drain.
    engine
        .store()
        .enqueue(Task::new(Action::Create, "/widgets", json!({"name": "y"})))
        .unwrap();
    engine.monitor().notify_platform_online();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.store().list().len(), 1);
    assert_eq!(remote.calls().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn a_background_completion_converges_the_page_store() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(FlippableRemote::new(true));
    // The page context never sees a transition: the probe stays offline, so
    // only the background context does the work.
    let probe = Arc::new(StaticProbe::new(false));
    let mut engine =
        SyncEngine::init_with(config_in(&dir), remote.clone(), probe.clone()).unwrap();

    let task = Task::new(Action::Delete, "/widgets/42", json!({"id": 42}));
    engine.store().enqueue(task.clone()).unwrap();

    let report = engine.background().unwrap().run_once().await.unwrap();
    assert_eq!(report.executed, 1);

    // The page store drops the task via the task-synced signal without
    // waiting for a reconcile.
    let store = engine.store();
    wait_until(move || store.is_empty()).await;
    assert!(engine.store().durable().list_all().unwrap().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn queued_tasks_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(FlippableRemote::new(false));
    let probe = Arc::new(StaticProbe::new(false));

    {
        let mut engine =
            SyncEngine::init_with(config_in(&dir), remote.clone(), probe.clone()).unwrap();
        engine
            .facade()
            .mutate(Action::Create, "/widgets", json!({"name": "x"}))
            .await
            .unwrap();
        engine.shutdown().await;
    }

    // A fresh process sees the queued task through the fast snapshot.
    let mut engine = SyncEngine::init_with(config_in(&dir), remote, probe).unwrap();
    let queued = engine.store().list();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action, Action::Create);

    engine.shutdown().await;
}
