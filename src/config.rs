//! Configuration management for the kill switch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Kill switch settings (the `killSwitch/` settings namespace).
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,

    /// Emergency backup settings.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Directory holding persistent state (threat log).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local sync root; file content inspection resolves relative item
    /// paths against this directory.
    #[serde(default = "default_sync_root")]
    pub sync_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kill_switch: KillSwitchConfig::default(),
            backup: BackupConfig::default(),
            data_dir: default_data_dir(),
            sync_root: default_sync_root(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.clamp();
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the on-disk threat log.
    pub fn threat_log_path(&self) -> PathBuf {
        self.data_dir.join("threats.json")
    }

    /// Clamp out-of-range values to sane bounds, warning on each adjustment.
    pub fn clamp(&mut self) {
        let ks = &mut self.kill_switch;
        if ks.delete_threshold == 0 {
            warn!("deleteThreshold 0 out of range, clamped to 1");
            ks.delete_threshold = 1;
        }
        if ks.time_window == 0 {
            warn!("timeWindow 0 out of range, clamped to 1");
            ks.time_window = 1;
        }
        if !(0.0..=8.0).contains(&ks.entropy_threshold) {
            let clamped = ks.entropy_threshold.clamp(0.0, 8.0);
            warn!(
                "entropyThreshold {} out of range, clamped to {}",
                ks.entropy_threshold, clamped
            );
            ks.entropy_threshold = clamped;
        }
    }
}

/// Kill switch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchConfig {
    /// Master protection toggle.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deletions within the window before the kill switch fires.
    #[serde(default = "default_delete_threshold")]
    pub delete_threshold: u32,

    /// Sliding event window, in seconds.
    #[serde(default = "default_time_window")]
    pub time_window: u64,

    /// Entropy above which a file is considered suspicious.
    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold: f64,

    /// Canary filename patterns (`*` and `?` wildcards accepted).
    #[serde(default = "default_canary_files")]
    pub canary_files: Vec<String>,

    /// Create emergency backups when the kill switch fires.
    #[serde(default = "default_true")]
    pub auto_backup: bool,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_threshold: default_delete_threshold(),
            time_window: default_time_window(),
            entropy_threshold: default_entropy_threshold(),
            canary_files: default_canary_files(),
            auto_backup: true,
        }
    }
}

/// Emergency backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Root directory for backup sessions. Empty disables the action.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Total size cap in MB; oldest sessions are removed when exceeded.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Sessions older than this many days are removed.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_size_mb: default_max_size_mb(),
            retention_days: default_retention_days(),
        }
    }
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_delete_threshold() -> u32 {
    10
}

fn default_time_window() -> u64 {
    60
}

fn default_entropy_threshold() -> f64 {
    7.5
}

fn default_canary_files() -> Vec<String> {
    vec![
        "_canary.txt".to_string(),
        ".canary".to_string(),
        "zzz_canary.txt".to_string(),
    ]
}

fn default_max_size_mb() -> u64 {
    500
}

fn default_retention_days() -> i64 {
    7
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".syncguard")
}

fn default_sync_root() -> PathBuf {
    PathBuf::from(".")
}
