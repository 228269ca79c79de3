//! Durable threat log.
//!
//! Append-only JSON record of detected threats and the actions taken. The
//! whole document is rewritten atomically on every append (temp file, fsync,
//! rename), so the log survives crashes mid-write. Writers serialize on an
//! internal lock; the process is assumed to be the only writer.

use crate::detector::{ThreatInfo, ThreatLevel};
use crate::error::{KillSwitchError, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct LogDocument {
    version: u32,
    threats: Vec<LogEntry>,
}

impl Default for LogDocument {
    fn default() -> Self {
        Self {
            version: 1,
            threats: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    timestamp: DateTime<Utc>,
    level: String,
    detector: String,
    description: String,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_taken: Option<String>,
}

impl LogEntry {
    fn to_threat(&self) -> ThreatInfo {
        ThreatInfo {
            level: ThreatLevel::from_str_lossy(&self.level),
            detector: self.detector.clone(),
            description: self.description.clone(),
            affected_files: self.files.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Per-level and per-detector threat counts.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub by_detector: HashMap<String, usize>,
}

/// Process-wide append-only threat record.
pub struct ThreatLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ThreatLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| KillSwitchError::LogIo {
                path: path.clone(),
                source,
            })?;
        }

        let log = Self {
            path,
            write_lock: Mutex::new(()),
        };

        if !log.path.exists() {
            log.write_document(&LogDocument::default())?;
        }

        info!("threat log at {:?}", log.path);
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a threat, optionally with the name of the action taken.
    pub fn log(&self, threat: &ThreatInfo, action_taken: Option<&str>) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut doc = self.read_document()?;
        doc.threats.push(LogEntry {
            timestamp: threat.timestamp,
            level: threat.level.as_str().to_string(),
            detector: threat.detector.clone(),
            description: threat.description.clone(),
            files: threat.affected_files.clone(),
            action_taken: action_taken.map(str::to_string),
        });
        self.write_document(&doc)?;

        info!(
            "logged threat: {} level: {} detector: {}",
            threat.description, threat.level, threat.detector
        );
        Ok(())
    }

    /// All recorded threats, oldest first.
    pub fn load_all(&self) -> Result<Vec<ThreatInfo>> {
        let doc = self.read_document()?;
        Ok(doc.threats.iter().map(LogEntry::to_threat).collect())
    }

    /// Threats recorded within the last `days` days.
    pub fn load_last_days(&self, days: i64) -> Result<Vec<ThreatInfo>> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|t| t.timestamp >= cutoff)
            .collect())
    }

    /// Drop all recorded threats.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_document(&LogDocument::default())?;
        info!("threat log cleared");
        Ok(())
    }

    /// Export the log as CSV: `Timestamp,Level,Detector,Description,Files`.
    /// Description and files are double-quoted, embedded quotes doubled,
    /// files joined with `;`.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let threats = self.load_all()?;

        let mut out = String::from("Timestamp,Level,Detector,Description,Files\n");
        for threat in &threats {
            let description = threat.description.replace('"', "\"\"");
            let files = threat.affected_files.join(";").replace('"', "\"\"");
            out.push_str(&format!(
                "{},{},{},\"{}\",\"{}\"\n",
                threat.timestamp.to_rfc3339(),
                threat.level,
                threat.detector,
                description,
                files
            ));
        }

        std::fs::write(path, out).map_err(|source| KillSwitchError::LogIo {
            path: path.to_path_buf(),
            source,
        })?;

        info!("exported {} threats to CSV: {:?}", threats.len(), path);
        Ok(())
    }

    /// Aggregate counts over the whole log.
    pub fn statistics(&self) -> Result<Statistics> {
        let mut stats = Statistics::default();

        for threat in self.load_all()? {
            stats.total += 1;
            match threat.level {
                ThreatLevel::Critical => stats.critical += 1,
                ThreatLevel::High => stats.high += 1,
                ThreatLevel::Medium => stats.medium += 1,
                ThreatLevel::Low => stats.low += 1,
                ThreatLevel::None => {}
            }
            *stats.by_detector.entry(threat.detector).or_insert(0) += 1;
        }

        Ok(stats)
    }

    fn read_document(&self) -> Result<LogDocument> {
        if !self.path.exists() {
            return Ok(LogDocument::default());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|source| KillSwitchError::LogIo {
                path: self.path.clone(),
                source,
            })?;

        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                // A corrupt log must not block the trigger path; start over.
                warn!("threat log {:?} is corrupt ({}), resetting", self.path, err);
                Ok(LogDocument::default())
            }
        }
    }

    /// Write the full document atomically: temp file in the same directory,
    /// fsync, rename over the target.
    fn write_document(&self, doc: &LogDocument) -> Result<()> {
        let io_err = |source| KillSwitchError::LogIo {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(&content).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
