//! Error types for the concord-memory crate.
//!
//! Validation failures are local and recoverable: callers log them and move
//! on. A capacity violation or a corrupted snapshot means the store's
//! invariants no longer hold and must be treated as fatal.

use concord_types::{AgentId, EntryKey, EntryValidationError};

/// Errors that can occur during memory store operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A store was configured with a capacity of zero.
    #[error("memory store capacity must be at least 1 (got {capacity})")]
    InvalidCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// An entry failed structural validation.
    #[error("invalid memory entry: {source}")]
    InvalidEntry {
        /// The underlying validation failure.
        #[from]
        source: EntryValidationError,
    },

    /// The store holds more entries than its capacity after enforcement.
    ///
    /// Indicates an internal bug or a corrupted snapshot.
    #[error("capacity violation in store of {owner}: {size} entries exceed capacity {capacity}")]
    CapacityViolation {
        /// The owning agent.
        owner: AgentId,
        /// Number of entries held.
        size: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// A snapshot contained the same key twice.
    #[error("duplicate memory entry key {key} in snapshot")]
    DuplicateKey {
        /// The repeated key.
        key: EntryKey,
    },

    /// A serialized store could not be decoded.
    #[error("malformed memory store snapshot: {reason}")]
    Malformed {
        /// Description of the decoding failure.
        reason: String,
    },
}

impl MemoryError {
    /// Whether the error is a locally recoverable validation failure.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidEntry { .. })
    }
}
