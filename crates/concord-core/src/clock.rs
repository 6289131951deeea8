//! Epoch counter and logical time.
//!
//! The clock is the single source of truth for temporal state in a run. It
//! holds two counters:
//!
//! - the **epoch**: the index of the next epoch to execute, starting at 0 and
//!   advanced exactly once when an epoch completes;
//! - the **logical time**: a run-wide counter handed out as memory entry
//!   timestamps, strictly increasing in the order entries are produced.
//!
//! Logical time replaces wall-clock time everywhere eviction order matters,
//! so replaying a run from the same seed produces identical stores. Both
//! counters use checked arithmetic and are persisted in checkpoints.

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Epoch counter would overflow.
    #[error("epoch counter overflow: cannot advance beyond u64::MAX")]
    EpochOverflow,

    /// Logical time would overflow.
    #[error("logical time overflow: cannot stamp beyond u64::MAX")]
    LogicalTimeOverflow,
}

/// Epoch counter plus logical timestamp source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochClock {
    /// Index of the next epoch to run.
    epoch: u64,

    /// Next logical timestamp to hand out.
    logical_time: u64,
}

impl EpochClock {
    /// Create a clock at epoch 0, logical time 0.
    pub const fn new() -> Self {
        Self {
            epoch: 0,
            logical_time: 0,
        }
    }

    /// Restore a clock from persisted counters.
    pub const fn from_parts(epoch: u64, logical_time: u64) -> Self {
        Self {
            epoch,
            logical_time,
        }
    }

    /// Index of the next epoch to run (equivalently, epochs completed).
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Next logical timestamp that [`stamp`](Self::stamp) will return.
    pub const fn logical_time(&self) -> u64 {
        self.logical_time
    }

    /// Hand out the next logical timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::LogicalTimeOverflow`] if the counter is exhausted.
    pub fn stamp(&mut self) -> Result<u64, ClockError> {
        let now = self.logical_time;
        self.logical_time = now
            .checked_add(1)
            .ok_or(ClockError::LogicalTimeOverflow)?;
        Ok(now)
    }

    /// Mark the current epoch complete. Returns the new epoch index.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::EpochOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.epoch = self.epoch.checked_add(1).ok_or(ClockError::EpochOverflow)?;
        Ok(self.epoch)
    }
}
