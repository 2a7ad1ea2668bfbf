use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::durability::{write_atomic, Durability};
use crate::error::{MemlogError, Result};

/// Name of the version marker inside a store directory.
pub const META_FILE: &str = "meta.json";

/// On-disk format written by this implementation.
pub const STORE_VERSION: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: String,
}

/// Write the version marker if absent, otherwise check it.
///
/// A mismatch fails with [`MemlogError::IncompatibleVersion`] unless
/// `ignore_version_check` is set. An undecodable marker always fails.
pub fn ensure(fs: &dyn Durability, dir: &Path, mode: u32, ignore_version_check: bool) -> Result<()> {
    let path = dir.join(META_FILE);
    let Some(bytes) = fs.read(&path)? else {
        let meta = Meta {
            version: STORE_VERSION.to_string(),
        };
        write_atomic(fs, dir, META_FILE, &serde_json::to_vec(&meta)?, mode)?;
        return Ok(());
    };

    let meta: Meta = serde_json::from_slice(&bytes).map_err(|e| MemlogError::CorruptMeta {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    if meta.version != STORE_VERSION {
        if !ignore_version_check {
            return Err(MemlogError::IncompatibleVersion {
                found: meta.version,
                expected: STORE_VERSION.to_string(),
            });
        }
        warn!(
            path = %path.display(),
            found = %meta.version,
            expected = STORE_VERSION,
            "ignoring store version mismatch"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::create_dir_durable;
    use crate::memory::InMemoryDurability;
    use std::path::PathBuf;

    fn setup() -> (InMemoryDurability, PathBuf) {
        let fs = InMemoryDurability::new();
        let dir = PathBuf::from("/root/store");
        create_dir_durable(&fs, &dir).unwrap();
        (fs, dir)
    }

    #[test]
    fn creates_marker_durably() {
        let (fs, dir) = setup();
        ensure(&fs, &dir, 0o600, false).unwrap();

        let after = fs.crash();
        let bytes = after.read(&dir.join(META_FILE)).unwrap().unwrap();
        assert_eq!(bytes, br#"{"version":"1"}"#);
        assert!(!after.exists(&dir.join("meta.json.tmp")));
    }

    #[test]
    fn accepts_current_version() {
        let (fs, dir) = setup();
        fs.put_file(&dir.join(META_FILE), br#"{"version":"1"}"#);
        ensure(&fs, &dir, 0o600, false).unwrap();
    }

    #[test]
    fn rejects_other_version() {
        let (fs, dir) = setup();
        fs.put_file(&dir.join(META_FILE), br#"{"version":"2"}"#);
        match ensure(&fs, &dir, 0o600, false) {
            Err(MemlogError::IncompatibleVersion { found, expected }) => {
                assert_eq!(found, "2");
                assert_eq!(expected, "1");
            }
            other => panic!("expected version error, got {other:?}"),
        }
    }

    #[test]
    fn ignore_flag_skips_version_check() {
        let (fs, dir) = setup();
        fs.put_file(&dir.join(META_FILE), br#"{"version":"0"}"#);
        ensure(&fs, &dir, 0o600, true).unwrap();
        // The marker is left as found.
        assert_eq!(
            fs.read(&dir.join(META_FILE)).unwrap().unwrap(),
            br#"{"version":"0"}"#
        );
    }

    #[test]
    fn garbage_marker_is_corrupt_even_when_ignoring() {
        let (fs, dir) = setup();
        fs.put_file(&dir.join(META_FILE), b"not json");
        assert!(matches!(
            ensure(&fs, &dir, 0o600, true),
            Err(MemlogError::CorruptMeta { .. })
        ));
    }
}
