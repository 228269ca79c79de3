//! Shannon entropy analysis for encryption detection.
//!
//! Normal files (text, documents) have low entropy (3-5 bits/byte).
//! Encrypted output is close to 8.0 bits/byte. Ransomware cannot avoid
//! producing high-entropy output; if the output had patterns it would not be
//! encrypted.

use crate::detector::{ThreatDetector, ThreatInfo, ThreatLevel};
use crate::manager::Event;
use crate::sync_item::{Instruction, ItemType, SyncItem};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Sample block size for large files.
const SAMPLE_BLOCK: usize = 32 * 1024;
/// Files up to this size are read whole.
const WHOLE_FILE_LIMIT: u64 = 64 * 1024;
/// Files up to this size get three sample blocks, larger ones five.
const THREE_BLOCK_LIMIT: u64 = 1024 * 1024;

/// File extensions that normally have high entropy (compressed or encrypted
/// by design).
const HIGH_ENTROPY_EXTENSIONS: &[&str] = &[
    // Archives
    ".zip", ".7z", ".rar", ".gz", ".bz2", ".xz", ".tar.gz", ".tgz",
    // Compressed media
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".mp3", ".mp4", ".avi", ".mkv", ".flac", ".ogg",
    // Container documents (compressed internally)
    ".pdf", ".docx", ".xlsx", ".pptx", ".odt", ".ods",
    // Encrypted
    ".gpg", ".aes", ".enc",
];

/// Calculate Shannon entropy of data.
///
/// Returns a value between 0.0 (all same bytes) and 8.0 (perfectly random).
/// Single pass, fixed-size frequency table, no allocations.
#[inline]
pub fn shannon(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut frequency = [0u64; 256];
    for &byte in data {
        frequency[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in &frequency {
        if count > 0 {
            let probability = count as f64 / len;
            entropy -= probability * probability.log2();
        }
    }

    entropy
}

/// Entropy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyClass {
    /// Repetitive data
    VeryLow,
    /// Text, source code
    Low,
    /// Binary, some compression
    Medium,
    /// Compressed
    High,
    /// Strongly encrypted, random
    VeryHigh,
}

/// Classify an entropy reading.
pub fn classify(entropy: f64) -> EntropyClass {
    match entropy {
        e if e < 2.0 => EntropyClass::VeryLow,
        e if e < 5.0 => EntropyClass::Low,
        e if e < 7.0 => EntropyClass::Medium,
        e if e < 7.8 => EntropyClass::High,
        _ => EntropyClass::VeryHigh,
    }
}

/// True when the extension marks a file that is high-entropy by design.
pub fn is_normally_high_entropy(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    HIGH_ENTROPY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Expected entropy range (min, max) by extension.
pub fn expected_range(path: &str) -> (f64, f64) {
    let lower = path.to_ascii_lowercase();
    let ends = |exts: &[&str]| exts.iter().any(|e| lower.ends_with(e));

    if ends(&[".txt", ".md", ".rst"]) {
        (3.0, 5.5)
    } else if ends(&[".cpp", ".h", ".py", ".js", ".ts", ".java", ".c"]) {
        (4.0, 6.0)
    } else if ends(&[".json", ".xml", ".yaml", ".yml", ".ini", ".conf"]) {
        (3.5, 5.5)
    } else if ends(&[".csv", ".tsv"]) {
        (3.0, 5.0)
    } else if ends(&[".html", ".htm"]) {
        (4.0, 6.0)
    } else {
        (0.0, 8.0)
    }
}

/// Block offsets for the multi-block sampling strategy.
fn sample_offsets(size: u64) -> Vec<u64> {
    let block = SAMPLE_BLOCK as u64;
    if size <= THREE_BLOCK_LIMIT {
        vec![0, size / 2 - block / 2, size - block]
    } else {
        // Five blocks distributed evenly across the file.
        let span = size - block;
        (0u64..5).map(|i| i * span / 4).collect()
    }
}

/// Measure file entropy with multi-block sampling.
///
/// Whole file up to 64 KiB; three 32 KiB blocks up to 1 MiB; five blocks
/// beyond that. Returns the maximum entropy across sampled blocks, which is
/// conservative for partially encrypted files. Stops early once a block
/// exceeds `early_exit` (pass 8.0 or more to disable).
pub fn measure_file(path: &Path, early_exit: f64) -> std::io::Result<f64> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    if size <= WHOLE_FILE_LIMIT {
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)?;
        return Ok(shannon(&data));
    }

    let mut max_entropy: f64 = 0.0;
    let mut buffer = vec![0u8; SAMPLE_BLOCK];

    for offset in sample_offsets(size) {
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buffer.len() {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let entropy = shannon(&buffer[..filled]);
        if entropy > max_entropy {
            max_entropy = entropy;
        }
        if entropy >= early_exit {
            break;
        }
    }

    Ok(max_entropy)
}

/// Bounded path → entropy cache backing the spike rule.
///
/// Best-effort: entries may be evicted at any time without affecting
/// correctness, so eviction drops the oldest half in one batch instead of
/// tracking strict recency.
struct EntropyCache {
    entries: HashMap<String, (f64, u64)>,
    tick: u64,
    capacity: usize,
}

impl EntropyCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            tick: 0,
            capacity: capacity.max(2),
        }
    }

    fn get(&self, path: &str) -> Option<f64> {
        self.entries.get(path).map(|(entropy, _)| *entropy)
    }

    fn insert(&mut self, path: &str, entropy: f64) {
        self.tick += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(path) {
            let mut ticks: Vec<u64> = self.entries.values().map(|(_, t)| *t).collect();
            ticks.sort_unstable();
            let cutoff = ticks[ticks.len() / 2];
            self.entries.retain(|_, (_, t)| *t > cutoff);
        }
        self.entries.insert(path.to_string(), (entropy, self.tick));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Detects encrypted files via Shannon entropy analysis.
pub struct EntropyDetector {
    enabled: AtomicBool,
    /// Readings at or above this are definitely encrypted.
    high_threshold: Mutex<f64>,
    /// Readings at or above this are suspicious when they also exceed the
    /// expected range for the file type.
    suspicious_threshold: Mutex<f64>,
    /// Local sync root; item paths are resolved against it.
    root: PathBuf,
    cache: Mutex<EntropyCache>,
}

impl EntropyDetector {
    /// Default cache bound.
    const CACHE_CAPACITY: usize = 10_000;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            high_threshold: Mutex::new(7.9),
            suspicious_threshold: Mutex::new(7.5),
            root: root.into(),
            cache: Mutex::new(EntropyCache::new(Self::CACHE_CAPACITY)),
        }
    }

    #[cfg(test)]
    fn with_cache_capacity(root: impl Into<PathBuf>, capacity: usize) -> Self {
        let detector = Self::new(root);
        *detector.cache.lock() = EntropyCache::new(capacity);
        detector
    }

    pub fn set_high_threshold(&self, threshold: f64) {
        *self.high_threshold.lock() = threshold.clamp(0.0, 8.0);
    }

    pub fn set_suspicious_threshold(&self, threshold: f64) {
        *self.suspicious_threshold.lock() = threshold.clamp(0.0, 8.0);
    }

    /// Number of cached readings. Diagnostics only.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl ThreatDetector for EntropyDetector {
    fn name(&self) -> &'static str {
        "EntropyDetector"
    }

    fn analyze(&self, item: &SyncItem, _recent_events: &[Event]) -> ThreatInfo {
        let mut result = ThreatInfo::none(self.name());

        if !self.is_enabled() {
            return result;
        }

        // Only file creations and modifications carry new content.
        if !matches!(item.instruction, Instruction::Create | Instruction::Modify) {
            return result;
        }
        if item.item_type == ItemType::Directory {
            return result;
        }

        // Compressed and encrypted formats are high-entropy by design.
        if is_normally_high_entropy(&item.path) {
            return result;
        }

        let high = *self.high_threshold.lock();
        let suspicious = *self.suspicious_threshold.lock();

        let local = item.local_path(&self.root);
        let entropy = match measure_file(&local, high) {
            Ok(e) => e,
            Err(err) => {
                debug!("cannot measure entropy of {:?}: {}", local, err);
                return result;
            }
        };

        let (expected_lo, expected_hi) = expected_range(&item.path);
        let previous = self.cache.lock().get(&item.path);

        if entropy >= high {
            result.level = ThreatLevel::Critical;
            result.description = format!(
                "Critical entropy: {entropy:.3} bits/byte (file: {})",
                item.path
            );
            result.affected_files.push(item.path.clone());
        } else if entropy >= suspicious && entropy > expected_hi {
            result.level = ThreatLevel::High;
            result.description = format!(
                "Suspicious entropy: {entropy:.3} (expected: {expected_lo:.1}-{expected_hi:.1}) for {}",
                item.path
            );
            result.affected_files.push(item.path.clone());
        } else if let Some(previous) = previous {
            // Sudden low-to-high transition means in-place encryption.
            let increase = entropy - previous;
            if increase > 2.0 && entropy > 7.0 {
                result.level = ThreatLevel::High;
                result.description = format!(
                    "Entropy spike: {previous:.1} -> {entropy:.1} (delta: +{increase:.1}) for {}",
                    item.path
                );
                result.affected_files.push(item.path.clone());
            }
        }

        self.cache.lock().insert(&item.path, entropy);

        result
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
