//! Canary (honeypot) file detection.
//!
//! Canary files are bait files that no legitimate software should touch.
//! Creating one is fine (initial setup); any other operation on one is
//! treated as a confirmed attack.

use crate::detector::{ThreatDetector, ThreatInfo, ThreatLevel};
use crate::error::KillSwitchError;
use crate::manager::Event;
use crate::sync_item::{base_name, Instruction, SyncItem};
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default canary filename patterns.
const DEFAULT_PATTERNS: &[&str] = &[
    "_canary.txt",
    ".canary",
    "zzz_canary.txt",
    "DO_NOT_DELETE.sentinel",
    ".killswitch_canary",
];

enum Matcher {
    /// Lowercase exact basename.
    Exact(String),
    /// Compiled case-insensitive glob (`*` / `?` wildcards).
    Glob(GlobMatcher),
}

struct CanaryPattern {
    raw: String,
    matcher: Matcher,
}

impl CanaryPattern {
    fn compile(pattern: &str) -> Result<Self, KillSwitchError> {
        let matcher = if pattern.contains('*') || pattern.contains('?') {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| KillSwitchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            Matcher::Glob(glob.compile_matcher())
        } else {
            Matcher::Exact(pattern.to_ascii_lowercase())
        };

        Ok(Self {
            raw: pattern.to_string(),
            matcher,
        })
    }

    fn matches(&self, file_name: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(name) => file_name.eq_ignore_ascii_case(name),
            Matcher::Glob(glob) => glob.is_match(file_name),
        }
    }
}

/// Detects operations on honeypot files.
pub struct CanaryDetector {
    enabled: AtomicBool,
    patterns: RwLock<Vec<CanaryPattern>>,
}

impl Default for CanaryDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CanaryDetector {
    pub fn new() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| CanaryPattern::compile(p).ok())
            .collect();

        Self {
            enabled: AtomicBool::new(true),
            patterns: RwLock::new(patterns),
        }
    }

    /// Add a canary pattern. Duplicates are ignored.
    pub fn add_pattern(&self, pattern: &str) -> Result<(), KillSwitchError> {
        let mut patterns = self.patterns.write();
        if patterns.iter().any(|p| p.raw == pattern) {
            return Ok(());
        }
        patterns.push(CanaryPattern::compile(pattern)?);
        Ok(())
    }

    pub fn remove_pattern(&self, pattern: &str) {
        self.patterns.write().retain(|p| p.raw != pattern);
    }

    /// Registered pattern strings.
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.read().iter().map(|p| p.raw.clone()).collect()
    }

    /// True when the path's basename matches a canary pattern.
    /// Depends only on the basename; matching is case-insensitive.
    pub fn is_canary_file(&self, path: &str) -> bool {
        let file_name = base_name(path);
        self.patterns.read().iter().any(|p| p.matches(file_name))
    }
}

impl ThreatDetector for CanaryDetector {
    fn name(&self) -> &'static str {
        "CanaryDetector"
    }

    fn analyze(&self, item: &SyncItem, _recent_events: &[Event]) -> ThreatInfo {
        let mut result = ThreatInfo::none(self.name());

        if !self.is_enabled() {
            return result;
        }

        // Renames count when either side of the rename is a canary.
        let touches_canary = self.is_canary_file(&item.path)
            || item
                .rename_target
                .as_deref()
                .map(|t| self.is_canary_file(t))
                .unwrap_or(false);

        if !touches_canary {
            return result;
        }

        let operation = match item.instruction {
            Instruction::Delete => "DELETED",
            Instruction::Modify => "MODIFIED",
            Instruction::Rename => "RENAMED",
            // A new canary file is OK (initial setup).
            Instruction::Create => return result,
            Instruction::Conflict => "TOUCHED",
        };

        result.level = ThreatLevel::Critical;
        result.description = format!("CANARY FILE {operation}: {}", item.path);
        result.affected_files.push(item.path.clone());

        result
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
