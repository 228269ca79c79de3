//! User alerting for confirmed threats.
//!
//! The transport (desktop notification, tray popup, webhook) belongs to the
//! embedding application; this action forwards the triggering threat to a
//! pluggable notifier and records it in the application log.

use crate::detector::ThreatInfo;
use crate::response::SyncAction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

type Notifier = Box<dyn Fn(&ThreatInfo) + Send + Sync>;

/// Notifies the user through the configured channel.
pub struct AlertAction {
    enabled: AtomicBool,
    notifier: Mutex<Option<Notifier>>,
}

impl Default for AlertAction {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertAction {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            notifier: Mutex::new(None),
        }
    }

    pub fn with_notifier<F>(notifier: F) -> Self
    where
        F: Fn(&ThreatInfo) + Send + Sync + 'static,
    {
        let action = Self::new();
        *action.notifier.lock() = Some(Box::new(notifier));
        action
    }

    pub fn set_notifier<F>(&self, notifier: F)
    where
        F: Fn(&ThreatInfo) + Send + Sync + 'static,
    {
        *self.notifier.lock() = Some(Box::new(notifier));
    }
}

impl SyncAction for AlertAction {
    fn name(&self) -> &'static str {
        "AlertAction"
    }

    fn execute(&self, threat: &ThreatInfo) -> anyhow::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        error!(
            "RANSOMWARE PROTECTION: {} ({} affected files, detector: {})",
            threat.description,
            threat.affected_files.len(),
            threat.detector
        );

        if let Some(notifier) = self.notifier.lock().as_ref() {
            notifier(threat);
        }

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
