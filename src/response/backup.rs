//! Emergency backup of at-risk files.
//!
//! When the kill switch fires, this action copies every affected file into a
//! timestamped session directory before ransomware can do further damage.
//!
//! Backup layout:
//!
//! ```text
//! {backup_dir}/
//!   └── 2026-01-11_153045/
//!       └── Documents/
//!           └── important.docx
//! ```
//!
//! Old sessions are pruned by age and by total size after every run.

use crate::detector::ThreatInfo;
use crate::error::KillSwitchError;
use crate::events::{EventBus, KillSwitchEvent};
use crate::response::SyncAction;
use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Session directory name format; lexicographic order is chronological.
const SESSION_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// How many trailing path components to preserve under the session root
/// (three parent directories plus the file name).
const PRESERVED_COMPONENTS: usize = 4;

#[derive(Default)]
struct SessionStats {
    files_backed_up: u64,
    bytes_backed_up: u64,
    last_backup_path: Option<PathBuf>,
}

/// Creates emergency backup copies of threatened files.
pub struct BackupAction {
    enabled: AtomicBool,
    backup_dir: PathBuf,
    /// Local sync root; affected paths are relative to it.
    sync_root: PathBuf,
    /// Total size cap in MB; 0 disables the cap.
    max_size_mb: AtomicU64,
    retention_days: AtomicI64,
    stats: Mutex<SessionStats>,
    /// Serializes concurrent executions into the backup directory.
    run_lock: Mutex<()>,
    bus: Option<EventBus>,
}

impl BackupAction {
    pub fn new(backup_dir: impl Into<PathBuf>, sync_root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            backup_dir: backup_dir.into(),
            sync_root: sync_root.into(),
            max_size_mb: AtomicU64::new(500),
            retention_days: AtomicI64::new(7),
            stats: Mutex::new(SessionStats::default()),
            run_lock: Mutex::new(()),
            bus: None,
        }
    }

    /// Publish `backup_created` events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn set_max_size_mb(&self, size_mb: u64) {
        self.max_size_mb.store(size_mb, Ordering::Relaxed);
    }

    pub fn set_retention_days(&self, days: i64) {
        self.retention_days.store(days.max(0), Ordering::Relaxed);
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn files_backed_up(&self) -> u64 {
        self.stats.lock().files_backed_up
    }

    pub fn bytes_backed_up(&self) -> u64 {
        self.stats.lock().bytes_backed_up
    }

    pub fn last_backup_path(&self) -> Option<PathBuf> {
        self.stats.lock().last_backup_path.clone()
    }

    /// Total size of all backup sessions in bytes.
    pub fn total_size(&self) -> u64 {
        dir_size(&self.backup_dir)
    }

    /// Remove sessions older than the retention window.
    /// Returns the number of sessions removed.
    pub fn clean_old_backups(&self) -> usize {
        let retention = self.retention_days.load(Ordering::Relaxed);
        let cutoff = Local::now().naive_local() - chrono::Duration::days(retention);
        let mut removed = 0;

        for session in self.session_dirs() {
            let name = match session.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let session_time = match NaiveDateTime::parse_from_str(&name, SESSION_FORMAT) {
                Ok(t) => t,
                Err(_) => continue, // not a session directory
            };

            if session_time < cutoff {
                match std::fs::remove_dir_all(&session) {
                    Ok(()) => {
                        info!("removed old backup: {name}");
                        removed += 1;
                    }
                    Err(e) => warn!("failed to remove old backup {name}: {e}"),
                }
            }
        }

        removed
    }

    /// Remove oldest sessions until the total size is under the cap.
    fn enforce_max_size(&self) {
        let max_mb = self.max_size_mb.load(Ordering::Relaxed);
        if max_mb == 0 {
            return; // no limit
        }

        let max_bytes = max_mb * 1024 * 1024;
        let mut current = self.total_size();
        if current <= max_bytes {
            return;
        }

        info!(
            "backup size {} MB exceeds limit {} MB",
            current / 1024 / 1024,
            max_mb
        );

        // Session names sort chronologically, so oldest first.
        for session in self.session_dirs() {
            if current <= max_bytes {
                break;
            }
            let session_size = dir_size(&session);
            match std::fs::remove_dir_all(&session) {
                Ok(()) => {
                    current = current.saturating_sub(session_size);
                    info!(
                        "removed backup to enforce size limit: {:?} ({} MB)",
                        session,
                        session_size / 1024 / 1024
                    );
                }
                Err(e) => warn!("failed to remove backup {:?}: {e}", session),
            }
        }
    }

    /// Session directories sorted by name (chronological).
    fn session_dirs(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    /// Copy one file into the session, preserving up to the last four
    /// components of its relative path. Returns false on skip or failure.
    fn backup_file(&self, relative: &str, session_root: &Path) -> bool {
        let source = self.sync_root.join(relative);

        let metadata = match std::fs::metadata(&source) {
            Ok(m) => m,
            Err(_) => {
                warn!("source file does not exist: {:?}", source);
                return false;
            }
        };
        if !metadata.is_file() {
            debug!("skipping non-file: {:?}", source);
            return false;
        }

        let components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
        let start = components.len().saturating_sub(PRESERVED_COMPONENTS);
        let preserved = components[start..].join("/");

        let dest = session_root.join(&preserved);
        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create backup subdirectory {:?}: {e}", parent);
                return false;
            }
        }

        if let Err(e) = std::fs::copy(&source, &dest) {
            warn!("failed to copy {:?} to {:?}: {e}", source, dest);
            return false;
        }

        let mut stats = self.stats.lock();
        stats.files_backed_up += 1;
        stats.bytes_backed_up += metadata.len();

        info!("backed up: {relative} ({} bytes)", metadata.len());
        true
    }
}

impl SyncAction for BackupAction {
    fn name(&self) -> &'static str {
        "BackupAction"
    }

    fn execute(&self, threat: &ThreatInfo) -> anyhow::Result<()> {
        if !self.is_enabled() {
            debug!("BackupAction is disabled, skipping");
            return Ok(());
        }
        if threat.affected_files.is_empty() {
            debug!("no affected files to backup");
            return Ok(());
        }

        let _guard = self.run_lock.lock();

        std::fs::create_dir_all(&self.backup_dir).map_err(|source| {
            KillSwitchError::BackupIo {
                path: self.backup_dir.clone(),
                source,
            }
        })?;

        let session_name = Local::now().format(SESSION_FORMAT).to_string();
        let session_root = self.backup_dir.join(&session_name);
        std::fs::create_dir_all(&session_root).map_err(|source| KillSwitchError::BackupIo {
            path: session_root.clone(),
            source,
        })?;

        info!("starting backup for threat: {}", threat.description);
        info!(
            "backup location: {:?}, files: {}",
            session_root,
            threat.affected_files.len()
        );

        let mut succeeded = 0;
        let mut failed = 0;
        for relative in &threat.affected_files {
            if self.backup_file(relative, &session_root) {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        self.stats.lock().last_backup_path = Some(session_root.clone());

        info!("backup complete: {succeeded} succeeded, {failed} failed");

        if let Some(bus) = &self.bus {
            bus.publish(&KillSwitchEvent::BackupCreated(
                session_root.to_string_lossy().into_owned(),
            ));
        }

        self.clean_old_backups();
        self.enforce_max_size();

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Total size of all regular files under `path`.
fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ThreatInfo, ThreatLevel};
    use chrono::Utc;
    use tempfile::tempdir;

    fn threat_with_files(files: &[&str]) -> ThreatInfo {
        ThreatInfo {
            level: ThreatLevel::Critical,
            detector: "TestDetector".to_string(),
            description: "test threat".to_string(),
            affected_files: files.iter().map(|f| f.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_execute_copies_files_preserving_structure() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();

        std::fs::create_dir_all(sync.path().join("docs/work")).unwrap();
        std::fs::write(sync.path().join("docs/work/report.docx"), b"report").unwrap();
        std::fs::write(sync.path().join("notes.txt"), b"notes").unwrap();

        let action = BackupAction::new(backups.path(), sync.path());
        action
            .execute(&threat_with_files(&["docs/work/report.docx", "notes.txt"]))
            .unwrap();

        let session = action.last_backup_path().unwrap();
        assert!(session.join("docs/work/report.docx").is_file());
        assert!(session.join("notes.txt").is_file());
        assert_eq!(action.files_backed_up(), 2);
        assert_eq!(
            std::fs::read(session.join("notes.txt")).unwrap(),
            b"notes".to_vec()
        );
    }

    #[test]
    fn test_deep_paths_keep_last_four_components() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();

        let deep = "a/b/c/d/e/file.txt";
        std::fs::create_dir_all(sync.path().join("a/b/c/d/e")).unwrap();
        std::fs::write(sync.path().join(deep), b"x").unwrap();

        let action = BackupAction::new(backups.path(), sync.path());
        action.execute(&threat_with_files(&[deep])).unwrap();

        let session = action.last_backup_path().unwrap();
        assert!(session.join("c/d/e/file.txt").is_file());
    }

    #[test]
    fn test_missing_files_skipped_not_fatal() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();

        std::fs::write(sync.path().join("real.txt"), b"real").unwrap();

        let action = BackupAction::new(backups.path(), sync.path());
        action
            .execute(&threat_with_files(&["missing.txt", "real.txt"]))
            .unwrap();

        assert_eq!(action.files_backed_up(), 1);
    }

    #[test]
    fn test_disabled_action_does_nothing() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();
        std::fs::write(sync.path().join("a.txt"), b"a").unwrap();

        let action = BackupAction::new(backups.path(), sync.path());
        action.set_enabled(false);
        action.execute(&threat_with_files(&["a.txt"])).unwrap();

        assert_eq!(action.files_backed_up(), 0);
        assert!(action.last_backup_path().is_none());
    }

    #[test]
    fn test_retention_sweep_removes_old_sessions() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();

        let old_name = (Local::now() - chrono::Duration::days(30))
            .format(SESSION_FORMAT)
            .to_string();
        let fresh_name = Local::now().format(SESSION_FORMAT).to_string();
        std::fs::create_dir_all(backups.path().join(&old_name)).unwrap();
        std::fs::create_dir_all(backups.path().join(&fresh_name)).unwrap();
        // Unparseable names are left alone.
        std::fs::create_dir_all(backups.path().join("not-a-session")).unwrap();

        let action = BackupAction::new(backups.path(), sync.path());
        let removed = action.clean_old_backups();

        assert_eq!(removed, 1);
        assert!(!backups.path().join(&old_name).exists());
        assert!(backups.path().join(&fresh_name).exists());
        assert!(backups.path().join("not-a-session").exists());
    }

    #[test]
    fn test_size_cap_removes_oldest_first() {
        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();

        // Three sessions of ~600 KB against a 1 MB cap.
        let names = ["2026-01-01_000000", "2026-01-02_000000", "2026-01-03_000000"];
        for name in &names {
            let dir = backups.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("blob.bin"), vec![0u8; 600 * 1024]).unwrap();
        }

        let action = BackupAction::new(backups.path(), sync.path());
        action.set_max_size_mb(1);
        action.set_retention_days(3650); // keep retention out of the way
        action.enforce_max_size();

        assert!(!backups.path().join(names[0]).exists());
        assert!(!backups.path().join(names[1]).exists());
        assert!(backups.path().join(names[2]).exists());
        assert!(action.total_size() <= 1024 * 1024);
    }

    #[test]
    fn test_backup_created_event_published() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let sync = tempdir().unwrap();
        let backups = tempdir().unwrap();
        std::fs::write(sync.path().join("a.txt"), b"a").unwrap();

        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe(move |event| {
            if matches!(event, KillSwitchEvent::BackupCreated(_)) {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let action = BackupAction::new(backups.path(), sync.path()).with_event_bus(bus);
        action.execute(&threat_with_files(&["a.txt"])).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
