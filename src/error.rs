//! Error taxonomy for the kill switch core.
//!
//! Detector failures never escape as errors: a detector that cannot read a
//! file reports no threat. The variants here cover the operations that do
//! surface failures to callers (log I/O, backup I/O, configuration).

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the kill switch core.
#[derive(Debug, Error)]
pub enum KillSwitchError {
    /// A file could not be read for content analysis.
    #[error("cannot read {path:?}: {source}")]
    PathUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A user-supplied pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A backup copy failed. Per-file; never aborts a session.
    #[error("backup of {path:?} failed: {source}")]
    BackupIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The threat log could not be read or written.
    #[error("threat log I/O on {path:?}: {source}")]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The threat log contained malformed JSON.
    #[error("threat log is corrupt: {0}")]
    LogCorrupt(#[from] serde_json::Error),

    /// A configuration value was outside its sane range and has been clamped.
    #[error("configuration value {key} = {value} out of range, clamped to {clamped}")]
    ConfigOutOfRange {
        key: &'static str,
        value: String,
        clamped: String,
    },
}

pub type Result<T> = std::result::Result<T, KillSwitchError>;
