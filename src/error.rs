//! Fatal analysis errors
//!
//! Every variant means the trace (or the analyzer) violated an invariant and the
//! statistics gathered so far can no longer be trusted. Callers propagate these
//! with `?`; nothing in the crate recovers from them.

use crate::trace::{CpuId, LockId, Timestamp};
use thiserror::Error;

/// Errors that abort a serial-section analysis run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SersecError {
    #[error("LockManager: released too many unheld locks (lock {lock:#x}, {misses} misses)")]
    UntrackedRelease { lock: LockId, misses: u32 },

    #[error("LockManager: acquired too many missing locks (lock {lock:#x}, {misses} misses)")]
    UntrackedAcquired { lock: LockId, misses: u32 },

    #[error("LockManager: duplicate state for lock {lock:#x}")]
    DuplicateLock { lock: LockId },

    #[error("SerialSectionSummary: section ends before it starts ({end} < {start})")]
    NegativeSection { start: Timestamp, end: Timestamp },

    #[error("cpu {cpu} out of range (max {max})")]
    CpuOutOfRange { cpu: CpuId, max: usize },
}

/// Result alias for the analysis core
pub type Result<T> = std::result::Result<T, SersecError>;
