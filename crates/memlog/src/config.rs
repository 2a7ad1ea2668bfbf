use std::path::PathBuf;

use crate::checkpoint::CheckpointPredicate;
use crate::error::{MemlogError, Result};

/// File mode applied to new store files when none is configured.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// I/O buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// Flush/sync strategy for log appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every append. An acknowledged write survives a crash.
    #[default]
    EveryWrite,
    /// Flush to the OS but rely on page-cache write-back.
    OsDefault,
}

/// Configuration for a [`Registry`](crate::Registry).
///
/// Zero values are replaced with defaults by [`Settings::normalize`], which
/// the registry calls at construction.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Registry root directory. Every store is a single sub-directory.
    pub root: PathBuf,
    /// Permission bits for new files. `0` selects `0o600`.
    pub file_mode: u32,
    /// Buffer size for the log writer in bytes. `0` selects 4096.
    pub buffer_size: usize,
    /// Checkpoint policy. `None` selects a 10 MiB size threshold.
    pub checkpoint: Option<CheckpointPredicate>,
    /// Open stores even if their meta file carries an unknown version.
    pub ignore_version_check: bool,
    /// Append durability.
    pub sync_mode: SyncMode,
}

impl Settings {
    /// Settings rooted at `root` with every other option defaulted.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Fill defaults and resolve the root to an absolute path.
    pub fn normalize(mut self) -> Result<Self> {
        if self.root.as_os_str().is_empty() {
            return Err(MemlogError::Configuration(
                "registry root must not be empty".into(),
            ));
        }
        self.fill_defaults();
        if self.file_mode & !0o7777 != 0 {
            return Err(MemlogError::Configuration(format!(
                "file mode {:#o} has bits outside 0o7777",
                self.file_mode
            )));
        }

        self.root = std::path::absolute(&self.root).map_err(|source| {
            MemlogError::PathResolution {
                path: self.root.clone(),
                source,
            }
        })?;
        Ok(self)
    }

    /// Replace zero options with their defaults. An unset checkpoint policy
    /// is resolved by each store when it opens.
    pub(crate) fn fill_defaults(&mut self) {
        if self.file_mode == 0 {
            self.file_mode = DEFAULT_FILE_MODE;
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_defaults() {
        let s = Settings::new("state").normalize().unwrap();
        assert_eq!(s.file_mode, DEFAULT_FILE_MODE);
        assert_eq!(s.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(s.root.is_absolute());
        assert!(s.root.ends_with("state"));
        assert!(!s.ignore_version_check);
        assert_eq!(s.sync_mode, SyncMode::EveryWrite);
        assert!(s.checkpoint.is_none());
    }

    #[test]
    fn normalize_keeps_explicit_values() {
        let s = Settings {
            root: "/var/lib/agent".into(),
            file_mode: 0o640,
            buffer_size: 64,
            checkpoint: Some(CheckpointPredicate::Always),
            ignore_version_check: true,
            sync_mode: SyncMode::OsDefault,
        }
        .normalize()
        .unwrap();

        assert_eq!(s.root, PathBuf::from("/var/lib/agent"));
        assert_eq!(s.file_mode, 0o640);
        assert_eq!(s.buffer_size, 64);
        assert!(matches!(s.checkpoint, Some(CheckpointPredicate::Always)));
        assert!(s.ignore_version_check);
    }

    #[test]
    fn empty_root_is_rejected() {
        let err = Settings::new("").normalize().unwrap_err();
        assert!(matches!(err, MemlogError::Configuration(_)));
    }

    #[test]
    fn bad_file_mode_is_rejected() {
        let s = Settings {
            file_mode: 0o100_000,
            ..Settings::new("/tmp/x")
        };
        assert!(matches!(
            s.normalize().unwrap_err(),
            MemlogError::Configuration(_)
        ));
    }
}
