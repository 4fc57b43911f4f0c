//! Connectivity Monitor
//!
//! Aggregates four reachability signals — platform transition events, focus
//! regained while reachable, a low-frequency probe poll, and cross-context
//! broadcasts — into debounced online/offline transitions. An online
//! transition is suppressed while a recently completed drain makes it
//! redundant; the suppression window widens at process start to avoid
//! duplicate drains immediately after a reload.

use crate::config::SyncPolicy;
use crate::coordinator::{CoordinatorBus, SyncSignal, UserNotice};
use crate::store::QueueStore;
use crate::types::now_millis;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Platform-reported reachability, injected by the host.
pub trait ReachabilityProbe: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Host-toggled probe: the platform tells the engine, the engine never
/// guesses.
pub struct StaticProbe {
    reachable: AtomicBool,
}

impl StaticProbe {
    pub fn new(initially_reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(initially_reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ReachabilityProbe for StaticProbe {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// A debounced connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub online_debounce: Duration,
    pub startup_debounce: Duration,
}

impl From<&SyncPolicy> for MonitorConfig {
    fn from(policy: &SyncPolicy) -> Self {
        Self {
            poll_interval: policy.poll_interval(),
            online_debounce: policy.online_debounce(),
            startup_debounce: policy.startup_debounce(),
        }
    }
}

/// The suppression window in force for a process of the given age.
fn suppression_window(process_age: Duration, config: &MonitorConfig) -> Duration {
    if process_age < config.startup_debounce {
        config.startup_debounce
    } else {
        config.online_debounce
    }
}

/// Whether an online transition is redundant given the last completed drain.
fn is_suppressed(last_sync_time: Option<u64>, now: u64, window: Duration) -> bool {
    match last_sync_time {
        Some(last) => now.saturating_sub(last) < window.as_millis() as u64,
        None => false,
    }
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    store: Arc<QueueStore>,
    bus: CoordinatorBus,
    transitions: broadcast::Sender<Transition>,
    online: AtomicBool,
    started_at: Instant,
    config: MonitorConfig,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<QueueStore>,
        bus: CoordinatorBus,
        config: MonitorConfig,
    ) -> Self {
        let (transitions, _) = broadcast::channel(16);
        let online = probe.is_reachable();
        Self {
            probe,
            store,
            bus,
            transitions,
            online: AtomicBool::new(online),
            started_at: Instant::now(),
            config,
        }
    }

    /// Last observed reachability.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Whether an online transition would currently be suppressed.
    pub fn online_suppressed(&self) -> bool {
        let window = suppression_window(self.started_at.elapsed(), &self.config);
        is_suppressed(self.store.last_sync_time(), now_millis(), window)
    }

    /// Signal 1: the platform reported a transition to reachable.
    pub fn notify_platform_online(&self) {
        self.consider_online("platform", true);
    }

    /// Signal 1: the platform reported a transition to unreachable.
    pub fn notify_platform_offline(&self) {
        self.mark_offline("platform", true);
    }

    /// Signal 2: the context regained focus or visibility; re-sample.
    pub fn notify_focus_regained(&self) {
        if self.probe.is_reachable() {
            self.consider_online("focus", true);
        }
    }

    /// Signal 4: another context observed a transition. Not re-broadcast.
    pub fn observe_broadcast(&self, online: bool) {
        if online {
            self.consider_online("broadcast", false);
        } else {
            self.mark_offline("broadcast", false);
        }
    }

    /// Signal 3: spawn the low-frequency poll that re-samples the probe to
    /// catch missed transition events.
    pub fn spawn_poll(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let reachable = monitor.probe.is_reachable();
                if reachable != monitor.is_online() {
                    if reachable {
                        monitor.consider_online("poll", true);
                    } else {
                        monitor.mark_offline("poll", true);
                    }
                }
            }
        })
    }

    fn consider_online(&self, source: &str, rebroadcast: bool) {
        let was_online = self.online.swap(true, Ordering::SeqCst);
        if self.online_suppressed() {
            debug!(source, "online transition suppressed by debounce");
            return;
        }
        info!(source, "connectivity transition: online");
        if !was_online {
            if let Err(err) = self.store.set_network_status(true) {
                warn!(error = %err, "failed to persist network status");
            }
        }
        if rebroadcast {
            self.bus
                .emit(SyncSignal::NetworkStatusChanged { online: true });
        }
        let _ = self.transitions.send(Transition::Online);
    }

    fn mark_offline(&self, source: &str, rebroadcast: bool) {
        let was_online = self.online.swap(false, Ordering::SeqCst);
        if !was_online {
            return;
        }
        info!(source, "connectivity transition: offline");
        if let Err(err) = self.store.set_network_status(false) {
            warn!(error = %err, "failed to persist network status");
        }
        self.bus.emit(SyncSignal::Notice(UserNotice::OfflineMode));
        if rebroadcast {
            self.bus
                .emit(SyncSignal::NetworkStatusChanged { online: false });
        }
        let _ = self.transitions.send(Transition::Offline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FastStore, SledTaskStore};
    use tempfile::TempDir;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(1_500),
            online_debounce: Duration::from_millis(3_000),
            startup_debounce: Duration::from_millis(5_000),
        }
    }

    fn queue_store(dir: &TempDir) -> Arc<QueueStore> {
        let fast = FastStore::open(dir.path().join("queue.json")).unwrap();
        let durable = SledTaskStore::open(dir.path().join("tasks.sled")).unwrap();
        Arc::new(QueueStore::new(fast, durable))
    }

    fn monitor_with(probe: Arc<StaticProbe>, store: Arc<QueueStore>) -> ConnectivityMonitor {
        ConnectivityMonitor::new(probe, store, CoordinatorBus::default(), test_config())
    }

    #[test]
    fn startup_widens_the_suppression_window() {
        let config = test_config();
        assert_eq!(
            suppression_window(Duration::from_millis(100), &config),
            config.startup_debounce
        );
        assert_eq!(
            suppression_window(Duration::from_secs(60), &config),
            config.online_debounce
        );
    }

    #[test]
    fn suppression_tracks_the_last_completed_drain() {
        let window = Duration::from_millis(3_000);
        assert!(!is_suppressed(None, 10_000, window));
        assert!(is_suppressed(Some(9_000), 10_000, window));
        assert!(!is_suppressed(Some(6_000), 10_000, window));
    }

    #[tokio::test]
    async fn platform_online_event_emits_a_transition() {
        let dir = TempDir::new().unwrap();
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe.clone(), queue_store(&dir));
        let mut transitions = monitor.subscribe();

        probe.set_reachable(true);
        monitor.notify_platform_online();

        assert_eq!(transitions.try_recv().unwrap(), Transition::Online);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn recent_drain_suppresses_the_online_transition() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);
        store.set_last_sync_time(now_millis()).unwrap();
        let monitor = monitor_with(Arc::new(StaticProbe::new(false)), store);
        let mut transitions = monitor.subscribe();

        monitor.notify_platform_online();

        assert!(transitions.try_recv().is_err());
        // State still tracks the platform even when the event is suppressed.
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn offline_transition_persists_the_network_status() {
        let dir = TempDir::new().unwrap();
        let store = queue_store(&dir);
        let monitor = monitor_with(Arc::new(StaticProbe::new(true)), store.clone());
        let mut transitions = monitor.subscribe();

        monitor.notify_platform_offline();

        assert_eq!(transitions.try_recv().unwrap(), Transition::Offline);
        let status = store.network_status().unwrap();
        assert!(!status.online);

        // A repeated offline report is not a transition.
        monitor.notify_platform_offline();
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test]
    async fn focus_regained_only_counts_while_reachable() {
        let dir = TempDir::new().unwrap();
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe.clone(), queue_store(&dir));
        let mut transitions = monitor.subscribe();

        monitor.notify_focus_regained();
        assert!(transitions.try_recv().is_err());

        probe.set_reachable(true);
        monitor.notify_focus_regained();
        assert_eq!(transitions.try_recv().unwrap(), Transition::Online);
    }
}
