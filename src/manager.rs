//! Central threat detection and response coordinator.
//!
//! The manager sits in the sync pipeline: every pending operation is passed
//! through [`KillSwitchManager::analyze_item`], which records it in the
//! sliding event window, runs the registered detectors, and decides whether
//! the operation may proceed. A confirmed High/Critical threat latches the
//! kill switch: sync pauses, response actions fire, and nothing syncs again
//! until a human calls [`KillSwitchManager::reset`].
//!
//! Architecture:
//!
//! ```text
//! KillSwitchManager
//!   ├── ThreatDetector[] (analyzers)
//!   │   ├── MassDeleteDetector
//!   │   ├── EntropyDetector
//!   │   ├── CanaryDetector
//!   │   └── PatternDetector
//!   └── SyncAction[] (responses)
//!       ├── BackupAction
//!       └── AlertAction
//! ```

use crate::config::Config;
use crate::detector::canary::CanaryDetector;
use crate::detector::entropy::EntropyDetector;
use crate::detector::mass_delete::{is_build_dir_path, MassDeleteDetector};
use crate::detector::pattern::PatternDetector;
use crate::detector::{ThreatDetector, ThreatInfo, ThreatLevel};
use crate::events::{EventBus, KillSwitchEvent};
use crate::response::{AlertAction, BackupAction, SyncAction};
use crate::sync_item::{Instruction, SyncItem};
use crate::threat_log::ThreatLog;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Interval of the background tick that evicts expired window events.
const EVICTION_TICK: Duration = Duration::from_secs(1);

/// Verdict for one pending sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn is_block(self) -> bool {
        self == Decision::Block
    }
}

/// Kind of a recorded file-operation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// One observed file operation in the sliding window.
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonic observation time.
    pub at: Instant,
    pub kind: EventKind,
    /// Relative, forward-slash normalized path.
    pub path: String,
}

struct ManagerState {
    enabled: bool,
    triggered: bool,
    threat_level: ThreatLevel,
    recent_events: VecDeque<Event>,
    threats: Vec<ThreatInfo>,
    delete_threshold: u32,
    window: Duration,
}

struct Inner {
    state: Mutex<ManagerState>,
    detectors: RwLock<Vec<Arc<dyn ThreatDetector>>>,
    actions: RwLock<Vec<Arc<dyn SyncAction>>>,
    bus: EventBus,
    threat_log: Option<ThreatLog>,
}

impl Inner {
    /// Purge events older than the window. Called from the eviction tick;
    /// detectors tolerate events up to one tick stale.
    fn evict_expired(&self) {
        let mut state = self.state.lock();
        let cutoff = Instant::now() - state.window;
        while let Some(front) = state.recent_events.front() {
            if front.at < cutoff {
                state.recent_events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Typed handles kept by [`KillSwitchManager::with_defaults`] so the
/// manager's configuration setters reach the live detectors.
struct DefaultHandles {
    mass_delete: Arc<MassDeleteDetector>,
    entropy: Arc<EntropyDetector>,
    canary: Arc<CanaryDetector>,
    backup: Option<Arc<BackupAction>>,
}

struct EvictionTask {
    stop_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Kill switch coordinator. All methods take `&self` and are safe to call
/// from multiple analyzer threads.
pub struct KillSwitchManager {
    inner: Arc<Inner>,
    defaults: Option<DefaultHandles>,
    eviction: EvictionTask,
}

impl KillSwitchManager {
    /// Create a bare manager with no detectors or actions registered.
    pub fn new(config: &Config) -> Self {
        Self::build(config, None)
    }

    /// Create a manager with the standard detector set (mass-delete,
    /// entropy, canary, pattern), the alert action, the backup action when a
    /// backup directory is configured, and a durable threat log.
    pub fn with_defaults(config: &Config) -> anyhow::Result<Self> {
        let log = ThreatLog::open(config.threat_log_path())?;
        let mut manager = Self::build(config, Some(log));
        let ks = &config.kill_switch;

        let mass_delete = Arc::new(MassDeleteDetector::new());
        mass_delete.set_threshold(ks.delete_threshold);

        let entropy = Arc::new(EntropyDetector::new(&config.sync_root));
        entropy.set_suspicious_threshold(ks.entropy_threshold);

        let canary = Arc::new(CanaryDetector::new());
        for pattern in &ks.canary_files {
            if let Err(e) = canary.add_pattern(pattern) {
                warn!("ignoring canary pattern: {e}");
            }
        }

        let pattern = Arc::new(PatternDetector::new());

        manager.register_detector(mass_delete.clone());
        manager.register_detector(entropy.clone());
        manager.register_detector(canary.clone());
        manager.register_detector(pattern);

        manager.register_action(Arc::new(AlertAction::new()));

        let backup = match &config.backup.directory {
            Some(dir) => {
                let action = Arc::new(
                    BackupAction::new(dir, &config.sync_root)
                        .with_event_bus(manager.inner.bus.clone()),
                );
                action.set_max_size_mb(config.backup.max_size_mb);
                action.set_retention_days(config.backup.retention_days);
                action.set_enabled(ks.auto_backup);
                manager.register_action(action.clone());
                Some(action)
            }
            None => None,
        };

        manager.defaults = Some(DefaultHandles {
            mass_delete,
            entropy,
            canary,
            backup,
        });

        Ok(manager)
    }

    fn build(config: &Config, threat_log: Option<ThreatLog>) -> Self {
        let ks = &config.kill_switch;
        let inner = Arc::new(Inner {
            state: Mutex::new(ManagerState {
                enabled: ks.enabled,
                triggered: false,
                threat_level: ThreatLevel::None,
                recent_events: VecDeque::new(),
                threats: Vec::new(),
                delete_threshold: ks.delete_threshold.max(1),
                window: Duration::from_secs(ks.time_window.max(1)),
            }),
            detectors: RwLock::new(Vec::new()),
            actions: RwLock::new(Vec::new()),
            bus: EventBus::new(),
            threat_log,
        });

        let eviction = Self::spawn_eviction(Arc::downgrade(&inner));

        info!("kill switch manager initialized");

        Self {
            inner,
            defaults: None,
            eviction,
        }
    }

    /// Periodic tick purging expired events. Holds only a weak handle so the
    /// thread cannot outlive the manager; `Drop` stops it explicitly.
    fn spawn_eviction(inner: Weak<Inner>) -> EvictionTask {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("killswitch-eviction".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(EVICTION_TICK) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => match inner.upgrade() {
                        Some(inner) => inner.evict_expired(),
                        None => break,
                    },
                }
            })
            .expect("failed to spawn eviction thread");

        EvictionTask {
            stop_tx,
            handle: Some(handle),
        }
    }

    // ---- state accessors ----

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Enable or disable protection entirely.
    pub fn set_enabled(&self, enabled: bool) {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = state.enabled != enabled;
            state.enabled = enabled;
            changed
        };
        if changed {
            info!("kill switch {}", if enabled { "enabled" } else { "disabled" });
            self.inner
                .bus
                .publish(&KillSwitchEvent::EnabledChanged(enabled));
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.state.lock().triggered
    }

    pub fn current_threat_level(&self) -> ThreatLevel {
        self.inner.state.lock().threat_level
    }

    /// Threats detected since the last reset.
    pub fn threats(&self) -> Vec<ThreatInfo> {
        self.inner.state.lock().threats.clone()
    }

    /// Number of events currently in the window. Diagnostics only.
    pub fn recent_event_count(&self) -> usize {
        self.inner.state.lock().recent_events.len()
    }

    /// Register a callback for manager events.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&KillSwitchEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback);
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn threat_log(&self) -> Option<&ThreatLog> {
        self.inner.threat_log.as_ref()
    }

    // ---- registration ----

    pub fn register_detector(&self, detector: Arc<dyn ThreatDetector>) {
        info!("registered detector: {}", detector.name());
        self.inner.detectors.write().push(detector);
    }

    pub fn register_action(&self, action: Arc<dyn SyncAction>) {
        info!("registered action: {}", action.name());
        self.inner.actions.write().push(action);
    }

    // ---- configuration ----

    pub fn set_delete_threshold(&self, count: u32, window_seconds: u64) {
        let count = count.max(1);
        let window_seconds = window_seconds.max(1);
        {
            let mut state = self.inner.state.lock();
            state.delete_threshold = count;
            state.window = Duration::from_secs(window_seconds);
        }
        if let Some(defaults) = &self.defaults {
            defaults.mass_delete.set_threshold(count);
        }
        info!("delete threshold set to {count} files in {window_seconds} seconds");
    }

    pub fn set_entropy_threshold(&self, threshold: f64) {
        let clamped = threshold.clamp(0.0, 8.0);
        if clamped != threshold {
            warn!(
                "{}",
                crate::error::KillSwitchError::ConfigOutOfRange {
                    key: "entropyThreshold",
                    value: threshold.to_string(),
                    clamped: clamped.to_string(),
                }
            );
        }
        if let Some(defaults) = &self.defaults {
            defaults.entropy.set_suspicious_threshold(clamped);
        }
        info!("entropy threshold set to {clamped}");
    }

    pub fn add_canary_file(&self, pattern: &str) {
        if let Some(defaults) = &self.defaults {
            match defaults.canary.add_pattern(pattern) {
                Ok(()) => info!("added canary file: {pattern}"),
                Err(e) => warn!("ignoring canary pattern: {e}"),
            }
        }
    }

    pub fn set_auto_backup(&self, enabled: bool) {
        if let Some(backup) = self.defaults.as_ref().and_then(|d| d.backup.as_ref()) {
            backup.set_enabled(enabled);
        }
        info!("auto-backup {}", if enabled { "enabled" } else { "disabled" });
    }

    // ---- analysis ----

    /// Analyze one pending sync operation.
    ///
    /// Returns [`Decision::Block`] when the operation must not be committed.
    /// Disabled protection always allows; a triggered kill switch always
    /// blocks without consulting detectors.
    pub fn analyze_item(&self, item: &SyncItem) -> Decision {
        // Record the event and snapshot the window under the lock; detectors
        // run on the snapshot so disk I/O never holds the lock.
        let snapshot: Vec<Event> = {
            let mut state = self.inner.state.lock();
            if !state.enabled {
                return Decision::Allow;
            }
            if state.triggered {
                return Decision::Block;
            }

            let kind = match item.instruction {
                Instruction::Delete => EventKind::Delete,
                Instruction::Create => EventKind::Create,
                Instruction::Modify | Instruction::Conflict => EventKind::Modify,
                Instruction::Rename => EventKind::Rename,
            };
            state.recent_events.push_back(Event {
                at: Instant::now(),
                kind,
                path: item.path.clone(),
            });

            state.recent_events.iter().cloned().collect()
        };

        let detectors: Vec<Arc<dyn ThreatDetector>> = self.inner.detectors.read().clone();

        let mut detected: Vec<ThreatInfo> = Vec::new();
        for detector in &detectors {
            let mut threat = detector.analyze(item, &snapshot);
            if threat.is_threat() {
                threat.timestamp = Utc::now();
                detected.push(threat);
            }
        }

        if !detected.is_empty() {
            let mut state = self.inner.state.lock();
            state.threats.extend(detected.iter().cloned());
        }
        for threat in &detected {
            warn!(
                "threat detected by {} - level: {} - {}",
                threat.detector, threat.level, threat.description
            );
            self.inner
                .bus
                .publish(&KillSwitchEvent::ThreatDetected(threat.clone()));
        }

        // The highest-severity result decides; all threats were recorded.
        if let Some(worst) = detected
            .iter()
            .filter(|t| t.level >= ThreatLevel::High)
            .max_by_key(|t| t.level)
        {
            self.trigger_with_files(&worst.description, worst.affected_files.clone());
            return Decision::Block;
        }

        self.evaluate_threat_level();
        Decision::Allow
    }

    /// Analyze a batch of pending operations, stopping at the first block.
    ///
    /// A batch whose deletions alone exceed twice the threshold triggers
    /// immediately, without per-item analysis.
    pub fn analyze_batch(&self, items: &[SyncItem]) -> Decision {
        let (enabled, threshold) = {
            let state = self.inner.state.lock();
            (state.enabled, state.delete_threshold)
        };
        if !enabled {
            return Decision::Allow;
        }

        let deletions: Vec<String> = items
            .iter()
            .filter(|i| i.instruction == Instruction::Delete)
            .map(|i| i.path.clone())
            .collect();

        if deletions.len() as u32 > threshold * 2 {
            self.trigger_with_files(
                &format!("Massive batch deletion detected: {} files", deletions.len()),
                deletions,
            );
            return Decision::Block;
        }

        for item in items {
            if self.analyze_item(item).is_block() {
                return Decision::Block;
            }
        }

        if self.is_triggered() {
            Decision::Block
        } else {
            Decision::Allow
        }
    }

    /// Manually trigger the kill switch. Idempotent: a second call while
    /// already triggered is a no-op.
    pub fn trigger(&self, reason: &str) {
        self.trigger_with_files(reason, Vec::new());
    }

    fn trigger_with_files(&self, reason: &str, affected_files: Vec<String>) {
        let threat = {
            let mut state = self.inner.state.lock();
            if state.triggered {
                return;
            }
            state.triggered = true;
            state.threat_level = ThreatLevel::Critical;

            let threat = ThreatInfo {
                level: ThreatLevel::Critical,
                detector: "KillSwitchManager".to_string(),
                description: reason.to_string(),
                affected_files,
                timestamp: Utc::now(),
            };
            state.threats.push(threat.clone());
            threat
        };

        error!("!!! KILL SWITCH TRIGGERED !!!");
        error!("reason: {reason}");

        // Actions observe the flipped state and run outside the lock.
        let actions: Vec<Arc<dyn SyncAction>> = self.inner.actions.read().clone();
        let mut executed: Vec<&'static str> = Vec::new();
        for action in &actions {
            if !action.is_enabled() {
                continue;
            }
            info!("executing action: {}", action.name());
            match action.execute(&threat) {
                Ok(()) => executed.push(action.name()),
                Err(e) => error!("action {} failed: {e:#}", action.name()),
            }
        }

        if let Some(log) = &self.inner.threat_log {
            let action_taken = if executed.is_empty() {
                None
            } else {
                Some(executed.join(", "))
            };
            if let Err(e) = log.log(&threat, action_taken.as_deref()) {
                error!("failed to write threat log: {e}");
            }
        }

        let bus = &self.inner.bus;
        bus.publish(&KillSwitchEvent::TriggeredChanged(true));
        bus.publish(&KillSwitchEvent::ThreatLevelChanged(ThreatLevel::Critical));
        bus.publish(&KillSwitchEvent::SyncPaused(reason.to_string()));
    }

    /// Reset after user confirmation: clears the latched state, the threat
    /// buffer, and the event window, then resumes sync.
    pub fn reset(&self) {
        {
            let mut state = self.inner.state.lock();
            state.triggered = false;
            state.threat_level = ThreatLevel::None;
            state.threats.clear();
            state.recent_events.clear();
        }

        info!("kill switch reset by user");

        let bus = &self.inner.bus;
        bus.publish(&KillSwitchEvent::TriggeredChanged(false));
        bus.publish(&KillSwitchEvent::ThreatLevelChanged(ThreatLevel::None));
        bus.publish(&KillSwitchEvent::SyncResumed);
    }

    /// Recompute the aggregate level from the deletion-count heuristic.
    /// Crossing into Critical auto-triggers.
    fn evaluate_threat_level(&self) {
        let (changed, new_level, delete_count, window_secs) = {
            let mut state = self.inner.state.lock();
            if state.triggered {
                return;
            }

            let delete_count = state
                .recent_events
                .iter()
                .filter(|e| e.kind == EventKind::Delete)
                .filter(|e| !self.is_whitelisted_for_heuristic(&e.path))
                .count() as u32;

            let threshold = state.delete_threshold as f64;
            let count = delete_count as f64;

            let new_level = if count >= threshold {
                ThreatLevel::Critical
            } else if count >= threshold * 0.7 {
                ThreatLevel::High
            } else if count >= threshold * 0.5 {
                ThreatLevel::Medium
            } else if count >= threshold * 0.3 {
                ThreatLevel::Low
            } else {
                ThreatLevel::None
            };

            let changed = new_level != state.threat_level;
            if changed {
                state.threat_level = new_level;
            }
            (changed, new_level, delete_count, state.window.as_secs())
        };

        if changed {
            self.inner
                .bus
                .publish(&KillSwitchEvent::ThreatLevelChanged(new_level));

            if new_level == ThreatLevel::Critical {
                self.trigger(&format!(
                    "Deletion threshold exceeded: {delete_count} files in {window_secs} seconds"
                ));
            }
        }
    }

    /// The aggregate heuristic honors the same whitelist as the mass-delete
    /// detector, so bulk build-directory cleanups never latch the switch.
    fn is_whitelisted_for_heuristic(&self, path: &str) -> bool {
        match &self.defaults {
            Some(defaults) => defaults.mass_delete.is_whitelisted(path),
            None => is_build_dir_path(path),
        }
    }
}

impl Drop for KillSwitchManager {
    fn drop(&mut self) {
        // Stop the eviction tick before the coordinator goes away.
        let _ = self.eviction.stop_tx.send(());
        if let Some(handle) = self.eviction.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_item::ItemType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.kill_switch.delete_threshold = 5;
        config
    }

    fn bare_manager() -> KillSwitchManager {
        KillSwitchManager::new(&test_config())
    }

    /// Counts emissions of selected event kinds.
    struct EventCounter {
        triggered: Arc<AtomicUsize>,
        paused: Arc<AtomicUsize>,
        resumed: Arc<AtomicUsize>,
        detected: Arc<AtomicUsize>,
    }

    impl EventCounter {
        fn attach(manager: &KillSwitchManager) -> Self {
            let triggered = Arc::new(AtomicUsize::new(0));
            let paused = Arc::new(AtomicUsize::new(0));
            let resumed = Arc::new(AtomicUsize::new(0));
            let detected = Arc::new(AtomicUsize::new(0));

            let (t, p, r, d) = (
                triggered.clone(),
                paused.clone(),
                resumed.clone(),
                detected.clone(),
            );
            manager.subscribe(move |event| match event {
                KillSwitchEvent::TriggeredChanged(true) => {
                    t.fetch_add(1, Ordering::SeqCst);
                }
                KillSwitchEvent::SyncPaused(_) => {
                    p.fetch_add(1, Ordering::SeqCst);
                }
                KillSwitchEvent::SyncResumed => {
                    r.fetch_add(1, Ordering::SeqCst);
                }
                KillSwitchEvent::ThreatDetected(_) => {
                    d.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            });

            Self {
                triggered,
                paused,
                resumed,
                detected,
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let manager = bare_manager();
        assert!(manager.is_enabled());
        assert!(!manager.is_triggered());
        assert_eq!(manager.current_threat_level(), ThreatLevel::None);
        assert!(manager.threats().is_empty());
    }

    #[test]
    fn test_enable_disable_emits_on_change() {
        let manager = bare_manager();
        let changes = Arc::new(AtomicUsize::new(0));
        let changes2 = changes.clone();
        manager.subscribe(move |event| {
            if matches!(event, KillSwitchEvent::EnabledChanged(_)) {
                changes2.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.set_enabled(false);
        assert!(!manager.is_enabled());
        manager.set_enabled(false); // no change, no emission
        manager.set_enabled(true);

        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trigger_latches_and_emits() {
        let manager = bare_manager();
        let counter = EventCounter::attach(&manager);
        let reason = Arc::new(Mutex::new(String::new()));
        let reason2 = reason.clone();
        manager.subscribe(move |event| {
            if let KillSwitchEvent::SyncPaused(r) = event {
                *reason2.lock() = r.clone();
            }
        });

        manager.trigger("Test trigger reason");

        assert!(manager.is_triggered());
        assert_eq!(manager.current_threat_level(), ThreatLevel::Critical);
        assert_eq!(counter.triggered.load(Ordering::SeqCst), 1);
        assert_eq!(counter.paused.load(Ordering::SeqCst), 1);
        assert_eq!(*reason.lock(), "Test trigger reason");

        // The synthetic threat is recorded.
        let threats = manager.threats();
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].detector, "KillSwitchManager");
        assert_eq!(threats[0].level, ThreatLevel::Critical);
    }

    #[test]
    fn test_double_trigger_is_idempotent() {
        let manager = bare_manager();
        let counter = EventCounter::attach(&manager);

        manager.trigger("First trigger");
        manager.trigger("Second trigger");

        assert_eq!(counter.triggered.load(Ordering::SeqCst), 1);
        assert_eq!(counter.paused.load(Ordering::SeqCst), 1);
        assert_eq!(manager.threats().len(), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let manager = bare_manager();
        let counter = EventCounter::attach(&manager);

        manager.analyze_item(&SyncItem::new("a.txt", Instruction::Delete));
        manager.trigger("Test");
        assert!(manager.is_triggered());

        manager.reset();

        assert!(!manager.is_triggered());
        assert_eq!(manager.current_threat_level(), ThreatLevel::None);
        assert!(manager.threats().is_empty());
        assert_eq!(manager.recent_event_count(), 0);
        assert_eq!(counter.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_triggered_blocks_without_detectors() {
        let manager = bare_manager();
        manager.trigger("latched");

        let item = SyncItem::new("harmless.txt", Instruction::Create);
        assert_eq!(manager.analyze_item(&item), Decision::Block);
        // Nothing was recorded while latched.
        assert_eq!(manager.recent_event_count(), 0);
    }

    #[test]
    fn test_disabled_allows_and_does_not_mutate() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));
        manager.set_enabled(false);

        let item = SyncItem::new("_canary.txt", Instruction::Delete);
        assert_eq!(manager.analyze_item(&item), Decision::Allow);
        assert!(!manager.is_triggered());
        assert_eq!(manager.recent_event_count(), 0);
        assert!(manager.threats().is_empty());
    }

    #[test]
    fn test_mass_delete_triggers_at_threshold() {
        let manager = bare_manager();
        let detector = Arc::new(MassDeleteDetector::new());
        detector.set_threshold(5);
        manager.register_detector(detector);
        let counter = EventCounter::attach(&manager);

        let mut decisions = Vec::new();
        for i in 0..6 {
            let item = SyncItem::new(format!("file{i}.txt"), Instruction::Delete);
            decisions.push(manager.analyze_item(&item));
            if manager.is_triggered() {
                break;
            }
        }

        assert_eq!(decisions.last(), Some(&Decision::Block));
        assert!(manager.is_triggered());
        assert!(counter.detected.load(Ordering::SeqCst) >= 1);
        assert_eq!(counter.paused.load(Ordering::SeqCst), 1);
        assert!(manager
            .threats()
            .iter()
            .any(|t| t.detector == "MassDeleteDetector" && t.level >= ThreatLevel::High));
    }

    #[test]
    fn test_whitelisted_mass_delete_does_not_trigger() {
        let manager = bare_manager();
        let detector = Arc::new(MassDeleteDetector::new());
        detector.set_threshold(5);
        manager.register_detector(detector);

        for i in 0..10 {
            let item = SyncItem::new(
                format!("project/node_modules/pkg_{i}/index.js"),
                Instruction::Delete,
            );
            assert_eq!(manager.analyze_item(&item), Decision::Allow);
        }

        assert!(!manager.is_triggered());
    }

    #[test]
    fn test_canary_modify_blocks() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));

        let item = SyncItem::new("_canary.txt", Instruction::Modify);
        assert_eq!(manager.analyze_item(&item), Decision::Block);
        assert!(manager.is_triggered());
        assert!(manager
            .threats()
            .iter()
            .any(|t| t.description.contains("MODIFIED")));
    }

    #[test]
    fn test_new_canary_file_allowed() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));
        let counter = EventCounter::attach(&manager);

        let item = SyncItem::new("_canary.txt", Instruction::Create);
        assert_eq!(manager.analyze_item(&item), Decision::Allow);
        assert!(!manager.is_triggered());
        assert_eq!(counter.detected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ransom_note_blocks() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(PatternDetector::new()));

        let item = SyncItem::new("HOW_TO_DECRYPT.txt", Instruction::Create);
        assert_eq!(manager.analyze_item(&item), Decision::Block);
        assert!(manager.is_triggered());
        assert!(manager
            .threats()
            .iter()
            .any(|t| t.description.contains("Ransom note")));
    }

    #[test]
    fn test_reset_then_retrigger() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));
        let counter = EventCounter::attach(&manager);

        let modify = SyncItem::new("_canary.txt", Instruction::Modify);
        assert_eq!(manager.analyze_item(&modify), Decision::Block);
        assert_eq!(counter.triggered.load(Ordering::SeqCst), 1);

        manager.reset();
        assert!(!manager.is_triggered());

        let delete = SyncItem::new(".canary", Instruction::Delete);
        assert_eq!(manager.analyze_item(&delete), Decision::Block);
        assert!(manager.is_triggered());
        assert_eq!(counter.triggered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_aggregate_heuristic_auto_triggers() {
        // No detectors registered; the deletion-count heuristic alone
        // latches the switch once the threshold is reached.
        let manager = bare_manager();
        let counter = EventCounter::attach(&manager);

        for i in 0..5 {
            let item = SyncItem::new(format!("doc{i}.txt"), Instruction::Delete);
            // The item itself is allowed; the latch applies afterwards.
            assert_eq!(manager.analyze_item(&item), Decision::Allow);
        }

        assert!(manager.is_triggered());
        assert_eq!(counter.paused.load(Ordering::SeqCst), 1);
        assert!(manager
            .threats()
            .iter()
            .any(|t| t.description.contains("Deletion threshold exceeded")));

        let next = SyncItem::new("doc5.txt", Instruction::Delete);
        assert_eq!(manager.analyze_item(&next), Decision::Block);
    }

    #[test]
    fn test_batch_massive_deletion_triggers_immediately() {
        let manager = bare_manager(); // threshold 5
        let items: Vec<SyncItem> = (0..11)
            .map(|i| SyncItem::new(format!("f{i}.dat"), Instruction::Delete))
            .collect();

        assert_eq!(manager.analyze_batch(&items), Decision::Block);
        assert!(manager.is_triggered());
        assert!(manager
            .threats()
            .iter()
            .any(|t| t.description.contains("Massive batch deletion")));
    }

    #[test]
    fn test_batch_stops_at_first_block() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));

        let items = vec![
            SyncItem::new("ok.txt", Instruction::Modify),
            SyncItem::new("_canary.txt", Instruction::Delete),
            SyncItem::new("later.txt", Instruction::Modify),
        ];

        assert_eq!(manager.analyze_batch(&items), Decision::Block);
        // First two items were recorded, the third never ran.
        assert_eq!(manager.recent_event_count(), 2);
    }

    #[test]
    fn test_conflict_counts_as_modify_in_window() {
        let manager = bare_manager();
        let detector = Arc::new(PatternDetector::new());
        detector.set_threshold(2);
        manager.register_detector(detector);

        // A conflicted suspicious file enters the window as a modification.
        let conflict = SyncItem::new("report.xlsx.locked", Instruction::Conflict);
        assert_eq!(manager.analyze_item(&conflict), Decision::Allow);

        // The next suspicious file sees it and escalates past the threshold.
        let create = SyncItem::new("photo.jpg.locked", Instruction::Create);
        assert_eq!(manager.analyze_item(&create), Decision::Block);
    }

    #[test]
    fn test_rename_reaches_canary_detector() {
        let manager = bare_manager();
        manager.register_detector(Arc::new(CanaryDetector::new()));

        let item = SyncItem::renamed("docs/.canary", "docs/readme_old.txt");
        assert_eq!(manager.analyze_item(&item), Decision::Block);
        assert!(manager.is_triggered());
    }

    #[test]
    fn test_directory_items_skip_entropy() {
        let root = tempdir().unwrap();
        let manager = bare_manager();
        manager.register_detector(Arc::new(EntropyDetector::new(root.path())));

        let item = SyncItem {
            path: "new_folder".to_string(),
            instruction: Instruction::Create,
            item_type: ItemType::Directory,
            rename_target: None,
        };
        assert_eq!(manager.analyze_item(&item), Decision::Allow);
    }

    #[test]
    fn test_window_eviction_purges_old_events() {
        let manager = bare_manager();
        manager.set_delete_threshold(100, 1); // 1 second window

        for i in 0..3 {
            manager.analyze_item(&SyncItem::new(format!("f{i}.txt"), Instruction::Modify));
        }
        assert_eq!(manager.recent_event_count(), 3);

        // Two eviction ticks comfortably cover the 1 s window.
        std::thread::sleep(Duration::from_millis(2300));
        assert_eq!(manager.recent_event_count(), 0);
    }

    #[test]
    fn test_failing_action_does_not_prevent_others() {
        struct FailingAction;
        impl SyncAction for FailingAction {
            fn name(&self) -> &'static str {
                "FailingAction"
            }
            fn execute(&self, _threat: &ThreatInfo) -> anyhow::Result<()> {
                anyhow::bail!("deliberate failure")
            }
            fn is_enabled(&self) -> bool {
                true
            }
            fn set_enabled(&self, _enabled: bool) {}
        }

        let manager = bare_manager();
        manager.register_action(Arc::new(FailingAction));

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let action = AlertAction::with_notifier(move |_| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        manager.register_action(Arc::new(action));

        manager.trigger("action failure test");

        assert!(manager.is_triggered());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_defaults_canary_writes_threat_log() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.data_dir = dir.path().join("state");
        config.sync_root = dir.path().to_path_buf();

        let manager = KillSwitchManager::with_defaults(&config).unwrap();

        let item = SyncItem::new("_canary.txt", Instruction::Delete);
        assert_eq!(manager.analyze_item(&item), Decision::Block);

        let logged = manager.threat_log().unwrap().load_all().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].level, ThreatLevel::Critical);
        assert!(logged[0].description.contains("CANARY"));
    }

    #[test]
    fn test_with_defaults_runs_backup_on_trigger() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.data_dir = dir.path().join("state");
        config.sync_root = dir.path().join("sync");
        config.backup.directory = Some(dir.path().join("backups"));

        std::fs::create_dir_all(config.sync_root.join("docs")).unwrap();
        std::fs::write(config.sync_root.join("docs/_canary.txt"), b"bait").unwrap();

        let manager = KillSwitchManager::with_defaults(&config).unwrap();

        let backups = Arc::new(Mutex::new(Vec::<String>::new()));
        let backups2 = backups.clone();
        manager.subscribe(move |event| {
            if let KillSwitchEvent::BackupCreated(path) = event {
                backups2.lock().push(path.clone());
            }
        });

        let item = SyncItem::new("docs/_canary.txt", Instruction::Modify);
        assert_eq!(manager.analyze_item(&item), Decision::Block);

        let sessions = backups.lock();
        assert_eq!(sessions.len(), 1);
        let session = std::path::PathBuf::from(&sessions[0]);
        assert!(session.join("docs/_canary.txt").is_file());
    }

    #[test]
    fn test_with_defaults_config_setters_reach_detectors() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.data_dir = dir.path().join("state");
        config.sync_root = dir.path().to_path_buf();

        let manager = KillSwitchManager::with_defaults(&config).unwrap();
        manager.add_canary_file("tripwire-*.doc");

        let item = SyncItem::new("archive/tripwire-2026.doc", Instruction::Delete);
        assert_eq!(manager.analyze_item(&item), Decision::Block);
    }
}
