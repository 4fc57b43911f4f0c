//! Request Façade
//!
//! Presents a uniform mutation API regardless of connectivity. While
//! reachable, mutations go straight to the remote service; while
//! unreachable they are wrapped as tasks, queued durably, applied to the
//! local mirror, and answered with a synthesized response shaped like a
//! server success, so calling code never branches on connectivity.

use crate::coordinator::{CoordinatorBus, SyncSignal, UserNotice};
use crate::error::SyncError;
use crate::monitor::ConnectivityMonitor;
use crate::remote::{ApiEnvelope, RemoteService};
use crate::store::{QueueStore, RecordMirror};
use crate::task::{Action, Task};
use crate::types::TempId;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RequestFacade {
    remote: Arc<dyn RemoteService>,
    store: Arc<QueueStore>,
    mirror: Arc<RecordMirror>,
    monitor: Arc<ConnectivityMonitor>,
    bus: CoordinatorBus,
}

impl RequestFacade {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        store: Arc<QueueStore>,
        mirror: Arc<RecordMirror>,
        monitor: Arc<ConnectivityMonitor>,
        bus: CoordinatorBus,
    ) -> Self {
        Self {
            remote,
            store,
            mirror,
            monitor,
            bus,
        }
    }

    /// Submit a mutation.
    ///
    /// Reachable: sent immediately, server response returned. Unreachable
    /// (or the send fails with the service unreachable): queued, and a
    /// synthesized `{ success: true, data: { id, ...payload } }` envelope is
    /// returned. Mutations addressed to a still-local placeholder id are
    /// always queued — the server has never heard of that record.
    pub async fn mutate(
        &self,
        action: Action,
        endpoint: &str,
        payload: Value,
    ) -> Result<ApiEnvelope, SyncError> {
        let targets_placeholder = matches!(action, Action::Update | Action::Delete)
            && trailing_segment(endpoint).map(TempId::is_temp).unwrap_or(false);

        if self.monitor.is_online() && !targets_placeholder {
            match self.remote.execute(action, endpoint, Some(&payload)).await {
                Ok(envelope) => return Ok(envelope),
                Err(SyncError::Unreachable(reason)) => {
                    debug!(%reason, "send failed while unreachable; queueing");
                }
                Err(err) => return Err(err),
            }
        }
        self.enqueue_offline(action, endpoint, payload)
    }

    /// Read the record collection. Reads never enqueue: while unreachable
    /// they are served from the local mirror, possibly stale.
    pub async fn fetch_records(&self, endpoint: &str) -> Result<ApiEnvelope, SyncError> {
        if self.monitor.is_online() {
            match self.remote.fetch(endpoint).await {
                Ok(envelope) => {
                    if let Some(Value::Array(records)) = &envelope.data {
                        if let Err(err) = self.mirror.replace_all(records.clone()) {
                            warn!(error = %err, "failed to cache fetched records");
                        }
                    }
                    return Ok(envelope);
                }
                Err(SyncError::Unreachable(reason)) => {
                    debug!(%reason, "fetch failed while unreachable; serving the mirror");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ApiEnvelope::synthesized(Value::Array(self.mirror.records())))
    }

    fn enqueue_offline(
        &self,
        action: Action,
        endpoint: &str,
        mut payload: Value,
    ) -> Result<ApiEnvelope, SyncError> {
        let display_id = match action {
            Action::Create => {
                let temp = TempId::mint();
                if let Some(map) = payload.as_object_mut() {
                    map.insert("tempId".to_string(), Value::String(temp.as_str().to_string()));
                }
                temp.as_str().to_string()
            }
            Action::Update | Action::Delete => trailing_segment(endpoint)
                .unwrap_or_default()
                .to_string(),
        };

        let task = Task::new(action, endpoint, payload.clone());
        self.store.enqueue(task)?;
        if let Err(err) = self.mirror.apply_optimistic(action, &display_id, &payload) {
            warn!(error = %err, "failed to apply optimistic mutation to the mirror");
        }
        self.bus.emit(SyncSignal::QueueChanged);
        self.bus
            .emit(SyncSignal::Notice(UserNotice::TaskPending(action)));
        info!(action = %action, id = %display_id, "queued offline mutation");

        let mut data = payload;
        if let Some(map) = data.as_object_mut() {
            map.insert("id".to_string(), Value::String(display_id));
        }
        Ok(ApiEnvelope::synthesized(data))
    }
}

fn trailing_segment(endpoint: &str) -> Option<&str> {
    endpoint.rsplit('/').next().filter(|s| !s.is_empty())
}
