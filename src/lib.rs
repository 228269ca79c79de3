//! Syncguard - Anti-ransomware kill switch for file-sync pipelines
//!
//! This library sits between a sync engine's change discovery and its
//! propagation step. Every pending operation is analyzed for signs of an
//! ongoing attack (mass deletion, encryption, canary tampering, ransom
//! notes); a confirmed threat blocks the operation, latches the sync into a
//! paused state, and fires the configured response actions. The latch only
//! clears when a human acknowledges the incident and resets.
//!
//! # Features
//!
//! - **Mass-delete detection** - Deletion counts and rates over a sliding
//!   window, with build-directory whitelisting
//! - **Entropy analysis** - Multi-block Shannon entropy sampling to catch
//!   encrypted content
//! - **Canary files** - Honeypot filenames whose modification is a
//!   zero-false-positive indicator
//! - **Pattern matching** - Known ransomware extensions, ransom notes,
//!   double extensions
//! - **Emergency backup** - Timestamped copies of at-risk files under
//!   retention and size caps
//!
//! # Example
//!
//! ```rust,no_run
//! use syncguard::{Config, Decision, Instruction, KillSwitchManager, SyncItem};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let manager = KillSwitchManager::with_defaults(&config)?;
//!
//!     let item = SyncItem::new("docs/report.docx", Instruction::Modify);
//!     if manager.analyze_item(&item) == Decision::Block {
//!         // Sync is paused; surface the threat list and wait for reset().
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod manager;
pub mod response;
pub mod sync_item;
pub mod threat_log;

pub use config::Config;
pub use detector::{ThreatDetector, ThreatInfo, ThreatLevel};
pub use error::KillSwitchError;
pub use events::{EventBus, KillSwitchEvent};
pub use manager::{Decision, Event, EventKind, KillSwitchManager};
pub use response::{AlertAction, BackupAction, SyncAction};
pub use sync_item::{Instruction, ItemType, SyncItem};
pub use threat_log::ThreatLog;
