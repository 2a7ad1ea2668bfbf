//! Checkpoint policy: decides when a store rewrites its full state and
//! truncates its log.
//!
//! The policy is evaluated by the store after every append, with the number
//! of log bytes accumulated since the last checkpoint. It never performs I/O
//! itself, so strategies can be tested in isolation from the mechanism.

use std::fmt;
use std::sync::Arc;

/// Default size threshold: 10 MiB of accumulated log.
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 10 * 1024 * 1024;

/// Strategy deciding whether a store must checkpoint.
#[derive(Clone)]
pub enum CheckpointPredicate {
    /// Checkpoint once the log reaches at least the given number of bytes.
    SizeThreshold(u64),
    /// Checkpoint after every write.
    Always,
    /// Never checkpoint automatically; the log grows until an explicit
    /// checkpoint.
    Never,
    /// Caller supplied decision function.
    Custom(Arc<dyn Fn(u64) -> bool + Send + Sync>),
}

impl CheckpointPredicate {
    /// Wrap a closure as a custom predicate.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Returns `true` if a store whose log holds `log_size` bytes must
    /// checkpoint before accepting further appends.
    pub fn should_checkpoint(&self, log_size: u64) -> bool {
        match self {
            Self::SizeThreshold(limit) => log_size >= *limit,
            Self::Always => true,
            Self::Never => false,
            Self::Custom(f) => f(log_size),
        }
    }
}

impl Default for CheckpointPredicate {
    fn default() -> Self {
        Self::SizeThreshold(DEFAULT_CHECKPOINT_BYTES)
    }
}

impl fmt::Debug for CheckpointPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeThreshold(limit) => f.debug_tuple("SizeThreshold").field(limit).finish(),
            Self::Always => f.write_str("Always"),
            Self::Never => f.write_str("Never"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
