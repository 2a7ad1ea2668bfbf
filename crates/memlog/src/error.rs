use std::io;
use std::path::PathBuf;

/// Errors produced by the registry and its stores.
#[derive(Debug, thiserror::Error)]
pub enum MemlogError {
    /// Invalid registry settings.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The registry root could not be resolved to an absolute path.
    #[error("cannot resolve registry root {path:?}: {source}")]
    PathResolution {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The requested store name cannot be mapped to a sub-directory.
    #[error("invalid store name {name:?}: {reason}")]
    InvalidStoreName { name: String, reason: String },

    /// The registry has begun closing and hands out no new stores.
    #[error("registry is closed")]
    RegistryClosed,

    /// Another handle for this store is still open.
    #[error("store {0:?} is already open")]
    StoreInUse(String),

    /// The on-disk meta marker does not match the supported format.
    #[error("incompatible store version: found {found:?}, expected {expected:?}")]
    IncompatibleVersion { found: String, expected: String },

    /// Operation attempted on a closed store.
    #[error("store is closed")]
    StoreClosed,

    /// The meta file exists but cannot be decoded.
    #[error("corrupt meta file {path:?}: {reason}")]
    CorruptMeta { path: PathBuf, reason: String },

    /// The checkpoint file exists but cannot be decoded.
    #[error("corrupt checkpoint {path:?}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A bounded close gave up before every store was closed.
    #[error("timed out waiting for {outstanding} open store(s)")]
    CloseTimeout { outstanding: usize },

    /// I/O error during store file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for MemlogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MemlogError>;
