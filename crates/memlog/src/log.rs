use std::io::{self, BufWriter, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::SyncMode;
use crate::durability::LogFile;
use crate::error::Result;

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// A single state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LogOp {
    Set { key: String, value: Value },
    Remove { key: String },
}

/// Log entry: a state change tagged with its transaction id.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-encoded LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    #[serde(flatten)]
    pub op: LogOp,
}

/// Encode a record into a complete frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(record)?;
    let length = payload.len() as u32;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Result of scanning a log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Records in file order.
    pub records: Vec<LogRecord>,
    /// Length of the prefix made of complete, valid frames.
    pub valid_len: u64,
    /// Whether bytes past `valid_len` had to be discarded.
    pub torn: bool,
}

/// Decode frames front-to-back.
///
/// Stops at the first frame that is short, fails its CRC, or does not
/// decode. Everything from that point on is the remains of an interrupted
/// append and is reported as torn.
pub fn decode_frames(bytes: &[u8]) -> Replay {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_SIZE {
            warn!(offset, remaining = rest.len(), "truncated log header");
            replay.torn = true;
            break;
        }

        let length = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let expected_crc = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);

        if length == 0 || HEADER_SIZE + length > rest.len() {
            warn!(offset, length, "invalid or truncated log entry");
            replay.torn = true;
            break;
        }

        let payload = &rest[HEADER_SIZE..HEADER_SIZE + length];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch in log entry"
            );
            replay.torn = true;
            break;
        }

        match serde_json::from_slice::<LogRecord>(payload) {
            Ok(record) => replay.records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "failed to decode log entry");
                replay.torn = true;
                break;
            }
        }

        offset += HEADER_SIZE + length;
    }

    replay.valid_len = offset as u64;
    replay
}

/// Buffered append sink for a store's log.
pub struct LogWriter {
    writer: Option<BufWriter<Box<dyn LogFile>>>,
    /// Bytes in the log since the last reset.
    size: u64,
    sync_mode: SyncMode,
}

impl LogWriter {
    pub fn new(file: Box<dyn LogFile>, buffer_size: usize, size: u64, sync_mode: SyncMode) -> Self {
        Self {
            writer: Some(BufWriter::with_capacity(buffer_size, file)),
            size,
            sync_mode,
        }
    }

    /// Bytes accumulated since the last reset.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a complete frame and flush it to the file.
    ///
    /// On failure the buffered bytes are dropped so that a later flush
    /// cannot write the remains of the failed frame. Whatever did reach the
    /// file stays there until [`rollback`](Self::rollback).
    pub fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        let result = self.write_frame(frame);
        match result {
            Ok(()) => self.size += frame.len() as u64,
            Err(_) => self.discard_buffered(),
        }
        result
    }

    /// Cut the file back to the end of the last successful append, removing
    /// any part of a failed frame that was written or synced.
    pub fn rollback(&mut self) -> io::Result<()> {
        let size = self.size;
        self.writer_mut()?.get_mut().truncate_to(size)
    }

    /// Truncate the log to zero bytes.
    pub fn reset(&mut self) -> io::Result<()> {
        let writer = self.writer_mut()?;
        writer.flush()?;
        writer.get_mut().truncate_to(0)?;
        self.size = 0;
        Ok(())
    }

    /// Flush, sync and release the file handle.
    pub fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush()?;
                writer.get_mut().sync()
            }
            None => Ok(()),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let sync_mode = self.sync_mode;
        let writer = self.writer_mut()?;
        writer.write_all(frame)?;
        writer.flush()?;
        if sync_mode == SyncMode::EveryWrite {
            writer.get_mut().sync()?;
        }
        Ok(())
    }

    fn discard_buffered(&mut self) {
        if let Some(writer) = self.writer.take() {
            let capacity = writer.capacity();
            let (file, _unwritten) = writer.into_parts();
            self.writer = Some(BufWriter::with_capacity(capacity, file));
        }
    }

    fn writer_mut(&mut self) -> io::Result<&mut BufWriter<Box<dyn LogFile>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("log writer is closed"))
    }
}
