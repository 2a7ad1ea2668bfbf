//! Full-state checkpoint file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::durability::{write_atomic, Durability};
use crate::error::{MemlogError, Result};

/// Name of the checkpoint inside a store directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Store state as of transaction `txid`.
#[derive(Debug, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    pub txid: u64,
    pub entries: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    txid: u64,
    entries: &'a BTreeMap<String, Value>,
}

/// Load the checkpoint in `dir`. Returns `Ok(None)` if none was written yet.
pub fn load(fs: &dyn Durability, dir: &Path) -> Result<Option<Snapshot>> {
    let path = dir.join(CHECKPOINT_FILE);
    let Some(bytes) = fs.read(&path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| MemlogError::CorruptCheckpoint {
            path,
            reason: e.to_string(),
        })
}

/// Atomically replace the checkpoint in `dir`.
pub fn write(
    fs: &dyn Durability,
    dir: &Path,
    txid: u64,
    entries: &BTreeMap<String, Value>,
    mode: u32,
) -> Result<()> {
    let data = serde_json::to_vec(&SnapshotRef { txid, entries })?;
    write_atomic(fs, dir, CHECKPOINT_FILE, &data, mode)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::create_dir_durable;
    use crate::memory::{FaultPoint, InMemoryDurability};
    use serde_json::json;
    use std::path::PathBuf;

    fn setup() -> (InMemoryDurability, PathBuf) {
        let fs = InMemoryDurability::new();
        let dir = PathBuf::from("/r/s");
        create_dir_durable(&fs, &dir).unwrap();
        (fs, dir)
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let (fs, dir) = setup();
        assert!(load(&fs, &dir).unwrap().is_none());
    }

    #[test]
    fn written_checkpoint_survives_crash() {
        let (fs, dir) = setup();
        let mut entries = BTreeMap::new();
        entries.insert("offset".to_string(), json!(42));
        write(&fs, &dir, 7, &entries, 0o600).unwrap();

        let snapshot = load(&fs.crash(), &dir).unwrap().unwrap();
        assert_eq!(snapshot.txid, 7);
        assert_eq!(snapshot.entries, entries);
    }

    #[test]
    fn failed_rename_keeps_previous_checkpoint() {
        let (fs, dir) = setup();
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), json!(1));
        write(&fs, &dir, 1, &entries, 0o600).unwrap();

        entries.insert("a".to_string(), json!(2));
        fs.fail_on(FaultPoint::Rename);
        assert!(write(&fs, &dir, 2, &entries, 0o600).is_err());

        let snapshot = load(&fs, &dir).unwrap().unwrap();
        assert_eq!(snapshot.txid, 1);
        assert_eq!(snapshot.entries["a"], json!(1));
        assert!(fs.exists(&dir.join("checkpoint.json.tmp")));
    }

    #[test]
    fn corrupt_checkpoint_is_reported() {
        let (fs, dir) = setup();
        fs.put_file(&dir.join(CHECKPOINT_FILE), b"{\"txid\":");
        assert!(matches!(
            load(&fs, &dir),
            Err(MemlogError::CorruptCheckpoint { .. })
        ));
    }
}
