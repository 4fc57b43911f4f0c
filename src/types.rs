//! Shared identifier and time primitives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static LAST_MINTED: AtomicU64 = AtomicU64::new(0);

/// Next value from the process-wide monotonic millisecond counter.
///
/// Values are unique and strictly increasing within a process even when two
/// mints land in the same millisecond.
pub fn next_monotonic_millis() -> u64 {
    loop {
        let last = LAST_MINTED.load(Ordering::Relaxed);
        let candidate = now_millis().max(last + 1);
        if LAST_MINTED
            .compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// Identifier of a queued task.
///
/// Minted from the monotonic millisecond counter: unique within a queue,
/// strictly increasing, never reused. FIFO ordering of the queue is ordering
/// by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Mint the next task id.
    pub fn next() -> Self {
        TaskId(next_monotonic_millis())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Big-endian key bytes, so byte-ordered iteration is FIFO iteration.
    pub fn to_key_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key_bytes(bytes: [u8; 8]) -> Self {
        TaskId(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        TaskId(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-minted placeholder identifier for an offline `Create`.
///
/// Namespaced with a `temp_` prefix so it can never be mistaken for a
/// server-assigned identifier; the server id supersedes it on successful
/// synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    pub const PREFIX: &'static str = "temp_";

    /// Mint a fresh placeholder identifier.
    pub fn mint() -> Self {
        TempId(format!("{}{}", Self::PREFIX, next_monotonic_millis()))
    }

    /// Whether a candidate identifier is a local placeholder.
    pub fn is_temp(candidate: &str) -> bool {
        candidate.starts_with(Self::PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
