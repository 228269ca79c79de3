//! Mass deletion detection.
//!
//! Flags bulk deletion activity that could indicate an `rm -rf` accident or
//! ransomware clearing files before encryption. Deletions inside known
//! development/build directories are expected to happen in bulk and are not
//! counted.

use crate::detector::{ThreatDetector, ThreatInfo, ThreatLevel};
use crate::manager::{Event, EventKind};
use crate::sync_item::{Instruction, SyncItem};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::debug;

/// Directories that are safely bulk-deleted during development.
const BUILD_DIRS: &[&str] = &[
    // JavaScript / Node.js
    "node_modules",
    ".npm",
    ".yarn",
    ".pnpm-store",
    // Build outputs
    "build",
    "dist",
    "out",
    "target",
    "bin",
    "obj",
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Python
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "venv",
    ".venv",
    "env",
    // IDE / editor
    ".idea",
    ".vscode",
    ".vs",
    // Package managers
    "vendor",
    "packages",
    // Caches
    ".cache",
    ".gradle",
    ".m2",
    // Temp
    "tmp",
    "temp",
];

/// True when any component of `path` names a known build directory.
/// Comparison is case-insensitive.
pub fn is_build_dir_path(path: &str) -> bool {
    path.split('/')
        .filter(|part| !part.is_empty())
        .any(|part| BUILD_DIRS.contains(&part.to_ascii_lowercase().as_str()))
}

/// Detects mass file deletion patterns.
pub struct MassDeleteDetector {
    enabled: AtomicBool,
    /// Deletions in the window before the level escalates to High.
    threshold: AtomicU32,
    /// Deletions per second before the level escalates to High.
    rate_limit: Mutex<f64>,
    /// User additions on top of [`BUILD_DIRS`], stored lowercase.
    extra_whitelist: RwLock<HashSet<String>>,
}

impl Default for MassDeleteDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MassDeleteDetector {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            threshold: AtomicU32::new(10),
            rate_limit: Mutex::new(5.0),
            extra_whitelist: RwLock::new(HashSet::new()),
        }
    }

    pub fn set_threshold(&self, count: u32) {
        self.threshold.store(count.max(1), Ordering::Relaxed);
    }

    pub fn set_rate_limit(&self, files_per_second: f64) {
        *self.rate_limit.lock() = files_per_second;
    }

    /// Whitelist an additional directory name (matched case-insensitively
    /// against every path component).
    pub fn add_whitelisted_dir(&self, name: &str) {
        self.extra_whitelist
            .write()
            .insert(name.to_ascii_lowercase());
    }

    /// True when the path lies inside a whitelisted directory.
    pub fn is_whitelisted(&self, path: &str) -> bool {
        if is_build_dir_path(path) {
            return true;
        }
        let extra = self.extra_whitelist.read();
        if extra.is_empty() {
            return false;
        }
        path.split('/')
            .filter(|part| !part.is_empty())
            .any(|part| extra.contains(&part.to_ascii_lowercase()))
    }

    /// Common ancestor directory shared by `paths`, if the set looks like a
    /// tree deletion: at least five paths below a non-trivial (one directory
    /// deep or more) common root.
    fn detect_tree_deletion(paths: &[String]) -> Option<String> {
        if paths.len() < 5 {
            return None;
        }

        let first = paths.first()?;
        let mut prefix: Vec<&str> = first.split('/').collect();
        prefix.pop(); // drop the file name

        for path in paths.iter().skip(1) {
            let components: Vec<&str> = path.split('/').collect();
            let shared = prefix
                .iter()
                .zip(components.iter())
                .take_while(|(a, b)| a == b)
                .count();
            prefix.truncate(shared);
            if prefix.is_empty() {
                return None;
            }
        }

        if prefix.len() < 2 {
            return None; // root-level prefix is trivial
        }
        Some(prefix.join("/"))
    }
}

impl ThreatDetector for MassDeleteDetector {
    fn name(&self) -> &'static str {
        "MassDeleteDetector"
    }

    fn analyze(&self, item: &SyncItem, recent_events: &[Event]) -> ThreatInfo {
        let mut result = ThreatInfo::none(self.name());

        if !self.is_enabled() {
            return result;
        }

        // Only interested in deletions.
        if item.instruction != Instruction::Delete {
            return result;
        }

        let mut delete_count: u32 = 0;
        let mut whitelisted_count: u32 = 0;
        let mut oldest = None;
        let mut newest = None;
        let mut deleted_paths: Vec<String> = Vec::new();

        for event in recent_events {
            if event.kind != EventKind::Delete {
                continue;
            }
            if self.is_whitelisted(&event.path) {
                whitelisted_count += 1;
                continue;
            }

            delete_count += 1;
            deleted_paths.push(event.path.clone());

            oldest = Some(match oldest {
                Some(t) if t < event.at => t,
                _ => event.at,
            });
            newest = Some(match newest {
                Some(t) if t > event.at => t,
                _ => event.at,
            });
            result.affected_files.push(event.path.clone());
        }

        if whitelisted_count > 0 {
            debug!(
                "skipped {} deletions in whitelisted directories",
                whitelisted_count
            );
        }

        let tree_root = Self::detect_tree_deletion(&deleted_paths);

        // Instantaneous deletion rate in files per second.
        let mut rate = 0.0;
        if let (Some(oldest), Some(newest)) = (oldest, newest) {
            let ms_elapsed = newest.duration_since(oldest).as_millis();
            if ms_elapsed > 0 {
                rate = delete_count as f64 * 1000.0 / ms_elapsed as f64;
            }
        }

        let threshold = self.threshold.load(Ordering::Relaxed);
        let rate_limit = *self.rate_limit.lock();

        if delete_count >= threshold * 2 {
            result.level = ThreatLevel::Critical;
            result.description = match &tree_root {
                Some(root) => {
                    format!("Critical: tree deletion of '{root}' ({delete_count} files)")
                }
                None => format!("Critical: {delete_count} files deleted (threshold: {threshold})"),
            };
        } else if delete_count >= threshold {
            result.level = ThreatLevel::High;
            result.description =
                format!("High: {delete_count} files deleted, approaching critical threshold");
        } else if rate > rate_limit {
            result.level = ThreatLevel::High;
            result.description =
                format!("High deletion rate: {rate:.1} files/sec (limit: {rate_limit:.1})");
        } else if delete_count > 0 && delete_count as f64 >= threshold as f64 * 0.5 {
            result.level = ThreatLevel::Medium;
            result.description = format!("Medium: {delete_count} files deleted in short window");
        }

        result
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
