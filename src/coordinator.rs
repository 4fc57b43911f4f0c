//! Cross-Context Coordinator
//!
//! Keeps independently running contexts (other open views, the background
//! execution context) eventually consistent about the queue. The shared
//! persisted stores are the primary coordination channel; this bus carries
//! the lightweight signals for latency-sensitive reaction.

use crate::task::Action;
use crate::types::TaskId;
use tokio::sync::broadcast;
use tracing::debug;

/// How a task left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Abandoned,
}

/// User-facing signals the core emits; rendering belongs to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    /// Entered offline mode; changes will be queued.
    OfflineMode,
    /// Connection restored, synchronizing queued changes.
    Synchronizing,
    /// A mutation was queued for later delivery.
    TaskPending(Action),
    /// A drain cycle finished.
    SyncComplete,
    /// A task was dropped after repeated failures or a server rejection.
    TaskAbandoned { id: TaskId, action: Action },
}

/// Signals broadcast between contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// The queue's contents changed; refresh any pending-state indicators.
    QueueChanged,
    /// A task was executed (or abandoned) by whichever context got there
    /// first; drop it from in-memory mirrors immediately.
    TaskSynced { id: TaskId, outcome: TaskOutcome },
    /// Another context observed a connectivity transition.
    NetworkStatusChanged { online: bool },
    Notice(UserNotice),
}

/// In-process signal bus shared by every context of the engine.
#[derive(Clone)]
pub struct CoordinatorBus {
    sender: broadcast::Sender<SyncSignal>,
}

impl CoordinatorBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.sender.subscribe()
    }

    /// Best-effort broadcast: a bus with no live subscribers drops the
    /// signal, which is fine — the persisted stores remain authoritative.
    pub fn emit(&self, signal: SyncSignal) {
        debug!(?signal, "coordinator signal");
        let _ = self.sender.send(signal);
    }
}

impl Default for CoordinatorBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signals_reach_every_subscriber() {
        let bus = CoordinatorBus::default();
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        let id = TaskId::next();
        bus.emit(SyncSignal::TaskSynced {
            id,
            outcome: TaskOutcome::Completed,
        });

        let expected = SyncSignal::TaskSynced {
            id,
            outcome: TaskOutcome::Completed,
        };
        assert_eq!(rx_a.recv().await.unwrap(), expected);
        assert_eq!(rx_b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_noop() {
        let bus = CoordinatorBus::default();
        bus.emit(SyncSignal::QueueChanged);
    }
}
