//! Sync-engine interface types.
//!
//! The sync engine hands the manager one [`SyncItem`] per pending operation.
//! Paths are relative to the sync root and forward-slash normalized,
//! matching what the engine's change discovery produces on every platform.

use std::path::{Path, PathBuf};

/// Pending operation kind as reported by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// A new file or directory appears.
    Create,
    /// Content of an existing file changes.
    Modify,
    /// A file or directory is removed.
    Delete,
    /// A file is renamed; `SyncItem::rename_target` holds the new path.
    Rename,
    /// A conflicted copy is about to be written. Treated as a modification
    /// for window accounting.
    Conflict,
}

/// Whether the item is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Directory,
}

/// One pending sync operation, as handed to the kill switch for analysis.
#[derive(Debug, Clone)]
pub struct SyncItem {
    /// Relative, forward-slash normalized path.
    pub path: String,
    pub instruction: Instruction,
    pub item_type: ItemType,
    /// New path for `Instruction::Rename`, relative and normalized.
    pub rename_target: Option<String>,
}

impl SyncItem {
    pub fn new(path: impl Into<String>, instruction: Instruction) -> Self {
        Self {
            path: path.into(),
            instruction,
            item_type: ItemType::File,
            rename_target: None,
        }
    }

    pub fn directory(path: impl Into<String>, instruction: Instruction) -> Self {
        Self {
            path: path.into(),
            instruction,
            item_type: ItemType::Directory,
            rename_target: None,
        }
    }

    pub fn renamed(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instruction: Instruction::Rename,
            item_type: ItemType::File,
            rename_target: Some(target.into()),
        }
    }

    /// Final path component of the item.
    pub fn file_name(&self) -> &str {
        base_name(&self.path)
    }

    /// Resolve the item against a local sync root for content inspection.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

/// Final component of a forward-slash path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/c.txt"), "c.txt");
        assert_eq!(base_name("c.txt"), "c.txt");
        assert_eq!(base_name(""), "");
    }

    #[test]
    fn test_local_path() {
        let item = SyncItem::new("docs/report.pdf", Instruction::Modify);
        let resolved = item.local_path(Path::new("/sync"));
        assert_eq!(resolved, PathBuf::from("/sync/docs/report.pdf"));
    }
}
