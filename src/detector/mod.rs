//! Threat detection module.
//!
//! Detectors are pluggable analyzers registered with the
//! [`KillSwitchManager`](crate::manager::KillSwitchManager). Each one is
//! handed the current sync item plus a snapshot of the recent event window
//! and reports a [`ThreatInfo`] ([`ThreatLevel::None`] when nothing is
//! suspicious).

pub mod canary;
pub mod entropy;
pub mod mass_delete;
pub mod pattern;

use crate::manager::Event;
use crate::sync_item::SyncItem;
use chrono::{DateTime, Utc};
use std::fmt;

/// Threat severity, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatLevel::None => "None",
            ThreatLevel::Low => "Low",
            ThreatLevel::Medium => "Medium",
            ThreatLevel::High => "High",
            ThreatLevel::Critical => "Critical",
        }
    }

    /// Parse the string form used in the threat log. Unknown strings map to
    /// `None` so a log written by a newer version still loads.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "Low" => ThreatLevel::Low,
            "Medium" => ThreatLevel::Medium,
            "High" => ThreatLevel::High,
            "Critical" => ThreatLevel::Critical,
            _ => ThreatLevel::None,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection result.
#[derive(Debug, Clone)]
pub struct ThreatInfo {
    pub level: ThreatLevel,
    pub detector: String,
    pub description: String,
    pub affected_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ThreatInfo {
    /// An empty "no threat" result attributed to `detector`.
    pub fn none(detector: &str) -> Self {
        Self {
            level: ThreatLevel::None,
            detector: detector.to_string(),
            description: String::new(),
            affected_files: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_threat(&self) -> bool {
        self.level != ThreatLevel::None
    }
}

/// An analyzer plugged into the manager.
///
/// Implementations must be safe to call from multiple analyzer threads; any
/// internal mutability (caches, counters) carries its own guard.
pub trait ThreatDetector: Send + Sync {
    /// Stable detector name, used in threat records and logs.
    fn name(&self) -> &'static str;

    /// Analyze one sync item against the recent event window.
    ///
    /// `recent_events` is a snapshot taken under the manager lock; it may be
    /// up to one eviction tick stale.
    fn analyze(&self, item: &SyncItem, recent_events: &[Event]) -> ThreatInfo;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);
}
