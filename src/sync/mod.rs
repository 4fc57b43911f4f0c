//! Sync Orchestration
//!
//! Drains the pending queue against the remote service: the page-context
//! orchestrator reacts to connectivity transitions, while the background
//! worker owns an independent copy of the drain algorithm over the durable
//! table so queued work completes with no view open.

pub mod background;
pub mod orchestrator;

pub use background::BackgroundSyncWorker;
pub use orchestrator::{DrainOutcome, DrainReport, SkipReason, SyncOrchestrator};

use crate::task::{Action, Task};
use serde_json::Value;

/// The payload actually sent for a task, with client-only fields removed.
///
/// `Create` strips the `tempId` correlation field (the server assigns the
/// authoritative identifier); `Update` strips any embedded `id` (the URL
/// carries it); `Delete` sends no body.
pub(crate) fn outbound_payload(task: &Task) -> Option<Value> {
    match task.action {
        Action::Create => Some(strip_field(&task.payload, "tempId")),
        Action::Update => Some(strip_field(&task.payload, "id")),
        Action::Delete => None,
    }
}

fn strip_field(payload: &Value, field: &str) -> Value {
    let mut stripped = payload.clone();
    if let Some(map) = stripped.as_object_mut() {
        map.remove(field);
    }
    stripped
}
