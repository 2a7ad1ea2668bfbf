//! File-backed, checkpointed key/value stores for long-running agents.
//!
//! A [`Registry`] owns a root directory and hands out named [`Store`]s, one
//! sub-directory each. A store keeps its state in memory and persists it as
//! a full checkpoint plus an append-only log of later changes. The
//! [`CheckpointPredicate`] decides when the log is folded into a new
//! checkpoint.
//!
//! # Layout
//!
//! ```text
//! <root>/<name>/meta.json        version marker
//! <root>/<name>/checkpoint.json  full state as of a transaction id
//! <root>/<name>/log.json         framed changes since the checkpoint
//! ```
//!
//! # Crash safety
//!
//! 1. Log frames carry a length and CRC32; a torn tail is discarded on open.
//! 2. Checkpoints are written to a temporary file, fsynced, renamed over the
//!    previous checkpoint and the directory is fsynced before the log is
//!    truncated.
//! 3. Log entries already covered by the checkpoint are skipped on replay,
//!    so a crash between rename and truncate is harmless.
//! 4. Leftover temporary files are deleted on open.
//!
//! All filesystem access goes through [`Durability`]; the
//! [`InMemoryDurability`] fake can simulate crashes and inject faults.

pub mod checkpoint;
pub mod config;
pub mod durability;
pub mod error;
pub mod log;
pub mod memory;
pub mod meta;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod wait_group;

pub use checkpoint::{CheckpointPredicate, DEFAULT_CHECKPOINT_BYTES};
pub use config::{Settings, SyncMode, DEFAULT_BUFFER_SIZE, DEFAULT_FILE_MODE};
pub use durability::{Durability, LogFile, OsDurability};
pub use error::{MemlogError, Result};
pub use memory::{FaultPoint, InMemoryDurability};
pub use registry::{validate_store_name, Registry};
pub use store::{Store, StoreState};
pub use wait_group::WaitGroup;
