//! Known-ransomware pattern detection.
//!
//! Three tests, in order: ransom-note filenames (immediate Critical),
//! known ransomware extensions, and double extensions like
//! `document.pdf.locked`. Extension hits escalate with the number of
//! suspicious files seen in the recent window.

use crate::detector::{ThreatDetector, ThreatInfo, ThreatLevel};
use crate::manager::{Event, EventKind};
use crate::sync_item::{base_name, Instruction, SyncItem};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::KillSwitchError;

/// Known ransomware extensions.
/// Sources: Recorded Future, ID Ransomware, Malwarebytes threat intelligence.
const RANSOMWARE_EXTENSIONS: &[&str] = &[
    // Generic encryption extensions
    ".locked", ".encrypted", ".enc", ".crypt", ".crypto", ".crypted", ".cry", ".crinf", ".r5a",
    ".xrnt", ".xtbl", ".crypz", ".xxx", ".aaa", ".abc", ".xyz", ".zzz", ".micro", ".ecc", ".ezz",
    ".exx", ".bleep",
    // Named ransomware families
    ".wannacry", ".wncry", ".wcry", ".wncryt", ".locky", ".odin", ".zepto", ".osiris", ".aesir",
    ".thor", ".cerber", ".cerber2", ".cerber3", ".petya", ".notpetya", ".goldeneye", ".conti",
    ".ryuk", ".maze", ".lockbit", ".revil", ".sodinokibi", ".darkside", ".ragnar", ".avaddon",
    ".babuk", ".clop", ".egregor", ".netwalker", ".phobos", ".dharma", ".crysis", ".globe",
    ".teslacrypt",
    // STOP/Djvu family (very common)
    ".stop", ".djvu", ".djvuq", ".djvur", ".djvus", ".djvut", ".pdff", ".pdfn", ".desu", ".boot",
    ".nood", ".kook", ".gero", ".hese", ".seto", ".mado", ".jope", ".nppp", ".remk", ".lmas",
    ".boza", ".boty", ".kiop",
    // Other families
    ".vvv", ".ccc", ".rrr", ".ttt", ".wallet", ".arena",
    ".java", // Java ransomware, not Java files
    ".onion", ".btc", ".nochance", ".paycrypt", ".serpent", ".venom", ".damage", ".fucked",
    ".rip", ".rdmk", ".helpme",
];

/// Ransom note filename patterns (matched case-insensitively on basenames).
const RANSOM_NOTE_PATTERNS: &[&str] = &[
    r"^readme.*\.txt$",
    r"^how[_\-\s]?to[_\-\s]?decrypt.*\.txt$",
    r"^how[_\-\s]?to[_\-\s]?restore.*\.txt$",
    r"^how[_\-\s]?to[_\-\s]?recover.*\.txt$",
    r"^decrypt[_\-\s]?instructions.*\.txt$",
    r"^restore[_\-\s]?files.*\.txt$",
    r"^your[_\-\s]?files.*\.txt$",
    r"^files[_\-\s]?encrypted.*\.txt$",
    r"^ransom.*\.txt$",
    r"^_readme[_\-]?\.txt$",
    r"^!readme!?\.txt$",
    r"^read[_\-\s]?me[_\-\s]?now.*\.txt$",
    r"^warning.*\.txt$",
    r"^decrypt[_\-]?all.*\.(txt|html)$",
    r"^unlock[_\-]?instructions.*\.txt$",
    r"@please_read_me@\.txt$",
    // WannaCry specific
    r"@wannacry@\.txt$",
    r"@wanadecryptor@\.txt$",
    // Locky specific
    r"_locky_recover.*\.txt$",
    // LockBit specific
    r"restore-my-files\.txt$",
    // Conti specific
    r"readme\.conti\.txt$",
];

/// Normal document extensions, for double-extension detection.
const NORMAL_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".jpg", ".jpeg", ".png", ".gif",
    ".bmp", ".mp3", ".mp4", ".avi", ".mov", ".txt", ".zip", ".rar", ".7z", ".csv", ".html",
    ".xml", ".json", ".sql", ".db", ".psd", ".ai", ".odt", ".ods", ".odp",
];

/// Detects ransomware naming patterns.
pub struct PatternDetector {
    enabled: AtomicBool,
    /// Suspicious files in the window before the level escalates to High.
    threshold: AtomicU32,
    ransom_extensions: RwLock<HashSet<String>>,
    note_patterns: RwLock<Vec<Regex>>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternDetector {
    pub fn new() -> Self {
        let extensions = RANSOMWARE_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();

        let patterns = RANSOM_NOTE_PATTERNS
            .iter()
            .filter_map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect();

        Self {
            enabled: AtomicBool::new(true),
            threshold: AtomicU32::new(3),
            ransom_extensions: RwLock::new(extensions),
            note_patterns: RwLock::new(patterns),
        }
    }

    pub fn set_threshold(&self, count: u32) {
        self.threshold.store(count.max(1), Ordering::Relaxed);
    }

    /// Register a custom ransomware extension (leading dot optional).
    pub fn add_extension(&self, extension: &str) {
        let mut ext = extension.to_ascii_lowercase();
        if !ext.starts_with('.') {
            ext.insert(0, '.');
        }
        self.ransom_extensions.write().insert(ext);
    }

    /// Register a custom ransom-note regex, matched case-insensitively
    /// against basenames.
    pub fn add_note_pattern(&self, pattern: &str) -> Result<(), KillSwitchError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| KillSwitchError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        self.note_patterns.write().push(regex);
        Ok(())
    }

    /// True when the path's last extension is a known ransomware extension.
    pub fn has_ransomware_extension(&self, path: &str) -> bool {
        let file_name = base_name(path);
        match file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => {
                let dotted = format!(".{}", ext.to_ascii_lowercase());
                self.ransom_extensions.read().contains(&dotted)
            }
            _ => false,
        }
    }

    /// True when the basename matches a known ransom-note pattern.
    pub fn is_ransom_note(&self, file_name: &str) -> bool {
        self.note_patterns
            .read()
            .iter()
            .any(|p| p.is_match(file_name))
    }

    /// True for names like `document.pdf.locked`: a normal document
    /// extension followed by a ransomware extension.
    pub fn has_double_extension(&self, file_name: &str) -> bool {
        let parts: Vec<&str> = file_name.split('.').collect();
        if parts.len() < 3 {
            return false; // need at least name.ext1.ext2
        }

        let last = format!(".{}", parts[parts.len() - 1].to_ascii_lowercase());
        let second_last = format!(".{}", parts[parts.len() - 2].to_ascii_lowercase());

        self.ransom_extensions.read().contains(&last)
            && NORMAL_EXTENSIONS.contains(&second_last.as_str())
    }

    fn is_suspicious_name(&self, path: &str) -> bool {
        let file_name = base_name(path);
        self.has_ransomware_extension(path)
            || self.has_double_extension(file_name)
            || self.is_ransom_note(file_name)
    }

    /// Count suspicious creations/modifications in the window.
    fn count_suspicious(&self, recent_events: &[Event]) -> u32 {
        recent_events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Create | EventKind::Modify))
            .filter(|e| self.is_suspicious_name(&e.path))
            .count() as u32
    }
}

impl ThreatDetector for PatternDetector {
    fn name(&self) -> &'static str {
        "PatternDetector"
    }

    fn analyze(&self, item: &SyncItem, recent_events: &[Event]) -> ThreatInfo {
        let mut result = ThreatInfo::none(self.name());

        if !self.is_enabled() {
            return result;
        }

        // Only new or changed files; deleting suspicious leftovers is fine.
        if !matches!(item.instruction, Instruction::Create | Instruction::Modify) {
            return result;
        }

        let file_name = item.file_name();

        if self.is_ransom_note(file_name) {
            result.level = ThreatLevel::Critical;
            result.description = format!("Ransom note detected: {file_name}");
            result.affected_files.push(item.path.clone());
            return result;
        }

        let has_ransom_ext = self.has_ransomware_extension(&item.path);
        let has_double_ext = self.has_double_extension(file_name);
        if !has_ransom_ext && !has_double_ext {
            return result;
        }

        // The current file plus everything suspicious already in the window.
        let suspicious_count = self.count_suspicious(recent_events) + 1;
        let threshold = self.threshold.load(Ordering::Relaxed);

        if suspicious_count >= threshold * 2 {
            result.level = ThreatLevel::Critical;
            result.description = format!(
                "Mass ransomware encryption detected: {suspicious_count} suspicious files"
            );
        } else if suspicious_count >= threshold {
            result.level = ThreatLevel::High;
            result.description = format!(
                "Multiple ransomware patterns detected: {suspicious_count} suspicious files"
            );
        } else if has_double_ext {
            result.level = ThreatLevel::Medium;
            result.description = format!("Suspicious double extension: {file_name}");
        } else {
            result.level = ThreatLevel::Low;
            result.description = format!("Suspicious ransomware extension: {file_name}");
        }

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
