//! Task model: one queued, not-yet-applied mutation.

use crate::types::{TaskId, TempId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Mutation kinds that can be queued for replay.
///
/// Reads are never queued; while unreachable the façade serves them from the
/// local record mirror. Verb dispatch over this set is always an exhaustive
/// match, so adding an action is a compile-time decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued mutation intended for the remote service.
///
/// Immutable once enqueued except for `retry_count`, which only increases.
/// Two tasks are equal when their ids are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub action: Action,
    /// Logical resource path; for update/delete it embeds the resource
    /// identifier as the trailing segment (which may itself be a temp id).
    pub endpoint: String,
    /// Action-specific data. A `Create` payload may carry a `tempId` field
    /// correlating the optimistic record with the eventual server identity;
    /// it is stripped before transmission.
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Task {
    /// Construct a new pending task with a freshly minted id.
    pub fn new(action: Action, endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            id: TaskId::next(),
            action,
            endpoint: endpoint.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Temp identifier carried by the payload, if any.
    pub fn temp_id(&self) -> Option<&str> {
        self.payload.get("tempId").and_then(Value::as_str)
    }

    /// Resource identifier embedded in the endpoint for update/delete tasks.
    pub fn target_id(&self) -> Option<&str> {
        match self.action {
            Action::Create => None,
            Action::Update | Action::Delete => {
                self.endpoint.rsplit('/').next().filter(|s| !s.is_empty())
            }
        }
    }

    /// Whether this task addresses a record that only exists locally.
    pub fn targets_placeholder(&self) -> bool {
        self.target_id().map(TempId::is_temp).unwrap_or(false)
    }
}
