use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointPredicate;
use crate::config::Settings;
use crate::durability::{create_dir_durable, Durability, TMP_SUFFIX};
use crate::error::{MemlogError, Result};
use crate::log::{self, LogOp, LogRecord, LogWriter};
use crate::registry::Lease;
use crate::{meta, snapshot};

/// Name of the append-only log inside a store directory.
pub const LOG_FILE: &str = "log.json";

/// Lifecycle state of a [`Store`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    Ready,
    Closed,
}

/// A named, file-backed key/value store.
///
/// State lives in memory and is persisted as a checkpoint file plus an
/// append-only log of changes made since that checkpoint. Every mutation is
/// appended to the log before it becomes visible; when the checkpoint
/// predicate fires, the full state is written to a new checkpoint and the
/// log is truncated.
///
/// A store has a single writer. Mutating methods take `&mut self`, and the
/// registry refuses to hand out a second handle for an open store.
pub struct Store {
    name: String,
    home: PathBuf,
    fs: Arc<dyn Durability>,
    file_mode: u32,
    predicate: CheckpointPredicate,
    entries: BTreeMap<String, Value>,
    /// Id of the last applied change.
    txid: u64,
    log: LogWriter,
    /// The log may end in a partial frame; the next write must checkpoint.
    log_invalid: bool,
    /// A checkpoint was due but did not complete.
    checkpoint_pending: bool,
    state: StoreState,
    lease: Option<Lease>,
}

impl Store {
    /// Open (or create) the store rooted at `home`.
    ///
    /// Creates the directory if missing, removes leftover temporary files,
    /// checks the version marker, then recovers state from the checkpoint
    /// and the log entries written after it.
    pub fn open(home: impl Into<PathBuf>, settings: &Settings, fs: Arc<dyn Durability>) -> Result<Self> {
        Self::open_leased(home.into(), settings, fs, None)
    }

    pub(crate) fn open_leased(
        home: PathBuf,
        settings: &Settings,
        fs: Arc<dyn Durability>,
        lease: Option<Lease>,
    ) -> Result<Self> {
        let mut settings = settings.clone();
        settings.fill_defaults();

        let name = home
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        create_dir_durable(&*fs, &home)?;
        remove_garbage(&*fs, &home, &name)?;
        meta::ensure(&*fs, &home, settings.file_mode, settings.ignore_version_check)?;

        let snapshot = snapshot::load(&*fs, &home)?.unwrap_or_default();
        let checkpoint_txid = snapshot.txid;
        let mut entries = snapshot.entries;
        let mut txid = checkpoint_txid;

        let log_path = home.join(LOG_FILE);
        let bytes = fs.read(&log_path)?.unwrap_or_default();
        let replay = log::decode_frames(&bytes);

        let mut replayed = 0usize;
        let mut skipped = 0usize;
        for record in replay.records {
            // Entries up to the checkpoint survive an interrupted truncate.
            if record.id <= txid {
                skipped += 1;
                continue;
            }
            txid = record.id;
            apply(&mut entries, record.op);
            replayed += 1;
        }

        let mut file = fs.open_log(&log_path, settings.file_mode)?;
        if replay.torn {
            warn!(
                store = %name,
                valid_len = replay.valid_len,
                file_len = bytes.len(),
                "discarding torn log tail"
            );
            file.truncate_to(replay.valid_len)?;
        }
        fs.sync_dir(&home)?;

        debug!(store = %name, replayed, skipped, "log replay complete");
        info!(
            store = %name,
            path = %home.display(),
            txid,
            entries = entries.len(),
            log_size = replay.valid_len,
            "store opened"
        );

        Ok(Self {
            name,
            log: LogWriter::new(file, settings.buffer_size, replay.valid_len, settings.sync_mode),
            home,
            fs,
            file_mode: settings.file_mode,
            predicate: settings.checkpoint.take().unwrap_or_default(),
            entries,
            txid,
            log_invalid: false,
            checkpoint_pending: false,
            state: StoreState::Ready,
            lease,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this store's files.
    pub fn path(&self) -> &Path {
        &self.home
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    /// Bytes appended to the log since the last checkpoint.
    pub fn log_size(&self) -> u64 {
        self.log.size()
    }

    /// Id of the last applied change.
    pub fn txid(&self) -> u64 {
        self.txid
    }

    pub fn get(&self, key: &str) -> Result<Option<&Value>> {
        self.ensure_open()?;
        Ok(self.entries.get(key))
    }

    /// Look up `key` and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.entries.contains_key(key))
    }

    /// Entries in key order.
    pub fn iter(&self) -> Result<impl Iterator<Item = (&str, &Value)>> {
        self.ensure_open()?;
        Ok(self.entries.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Insert or replace `key`.
    ///
    /// The change is durable (subject to the sync mode) once this returns
    /// `Ok`. If the append fails the change is not applied.
    pub fn set<V: Serialize>(&mut self, key: &str, value: V) -> Result<()> {
        self.ensure_open()?;
        let value = serde_json::to_value(value)?;
        self.append(LogOp::Set {
            key: key.to_string(),
            value,
        })
    }

    /// Remove `key`. Returns `false` without writing anything if the key
    /// does not exist.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        self.append(LogOp::Remove {
            key: key.to_string(),
        })?;
        Ok(true)
    }

    /// Write the full state to a new checkpoint and truncate the log.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write_checkpoint()
    }

    /// Flush buffered writes, release file handles and notify the owning
    /// registry. Every later operation fails with
    /// [`MemlogError::StoreClosed`].
    ///
    /// A log that may still hold a failed append is replaced by a
    /// checkpoint first.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        let pending = if self.log_invalid || self.checkpoint_pending {
            self.write_checkpoint()
        } else {
            Ok(())
        };
        self.state = StoreState::Closed;
        let closed = self.log.close().map_err(MemlogError::from);
        drop(self.lease.take());
        let result = pending.and(closed);

        match &result {
            Ok(()) => info!(store = %self.name, txid = self.txid, "store closed"),
            Err(e) => warn!(store = %self.name, error = %e, "store closed with error"),
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            StoreState::Ready => Ok(()),
            StoreState::Closed => Err(MemlogError::StoreClosed),
        }
    }

    fn append(&mut self, op: LogOp) -> Result<()> {
        if self.log_invalid || self.checkpoint_pending {
            self.write_checkpoint()?;
        }

        let record = LogRecord {
            id: self.txid + 1,
            op,
        };
        let frame = log::encode_frame(&record)?;
        if let Err(e) = self.log.append(&frame) {
            warn!(store = %self.name, error = %e, "log append failed");
            if let Err(rollback) = self.log.rollback() {
                // The failed frame may still be complete in the log. Its id
                // is burned so the next checkpoint shadows it on replay.
                warn!(store = %self.name, error = %rollback, "log rollback failed");
                self.txid = record.id;
                self.log_invalid = true;
            }
            return Err(e.into());
        }

        self.txid = record.id;
        apply(&mut self.entries, record.op);
        debug!(
            store = %self.name,
            txid = self.txid,
            log_size = self.log.size(),
            "log append"
        );

        if self.predicate.should_checkpoint(self.log.size()) {
            // The change is already in the log; a failed checkpoint is
            // retried before the next append.
            if let Err(e) = self.write_checkpoint() {
                warn!(store = %self.name, error = %e, "checkpoint failed");
            }
        }
        Ok(())
    }

    fn write_checkpoint(&mut self) -> Result<()> {
        self.checkpoint_pending = true;
        snapshot::write(&*self.fs, &self.home, self.txid, &self.entries, self.file_mode)?;
        self.log.reset()?;
        self.checkpoint_pending = false;
        self.log_invalid = false;

        info!(
            store = %self.name,
            txid = self.txid,
            entries = self.entries.len(),
            "checkpoint written"
        );
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.state == StoreState::Ready {
            warn!(store = %self.name, "store dropped without close");
            if let Err(e) = self.close() {
                warn!(store = %self.name, error = %e, "implicit close failed");
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("path", &self.home)
            .field("state", &self.state)
            .field("txid", &self.txid)
            .field("entries", &self.entries.len())
            .field("log_size", &self.log.size())
            .finish()
    }
}

fn apply(entries: &mut BTreeMap<String, Value>, op: LogOp) {
    match op {
        LogOp::Set { key, value } => {
            entries.insert(key, value);
        }
        LogOp::Remove { key } => {
            entries.remove(&key);
        }
    }
}

/// Remove files left behind by an interrupted atomic write.
fn remove_garbage(fs: &dyn Durability, home: &Path, name: &str) -> Result<()> {
    for path in fs.list_dir(home)? {
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TMP_SUFFIX));
        if is_tmp {
            warn!(store = %name, path = %path.display(), "removing leftover temporary file");
            fs.remove_file(&path)?;
        }
    }
    Ok(())
}
