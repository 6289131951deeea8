//! Checkpoint storage.
//!
//! The orchestrator treats persistence as an opaque key-value sink: it saves
//! the dictionary form of the whole run keyed by epoch and, on restore, asks
//! for the most recent one. Concrete backends live at the edges; only the
//! in-memory adapter ships with the core.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Errors raised by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Filesystem or other I/O failure.
    #[error("checkpoint I/O failed: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The checkpoint could not be encoded or decoded.
    #[error("checkpoint serialization failed: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },

    /// Any other backend failure.
    #[error("checkpoint backend failed: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },
}

/// Load/save of whole-run checkpoints.
pub trait PersistenceAdapter: Send {
    /// Store the checkpoint taken after `epoch` epochs completed.
    ///
    /// Saving the same epoch twice overwrites the earlier checkpoint.
    fn save(&mut self, epoch: u64, state: &serde_json::Value) -> Result<(), PersistenceError>;

    /// The checkpoint with the highest epoch, if any.
    fn load_latest(&self) -> Result<Option<serde_json::Value>, PersistenceError>;
}

/// Checkpoints held in process memory.
///
/// Clones share the same storage, so a test can keep a handle while the
/// orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    checkpoints: Arc<Mutex<BTreeMap<u64, serde_json::Value>>>,
}

impl InMemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The checkpoint saved for `epoch`, if any.
    pub fn checkpoint(&self, epoch: u64) -> Option<serde_json::Value> {
        self.checkpoints
            .lock()
            .ok()
            .and_then(|map| map.get(&epoch).cloned())
    }

    /// Epochs with a saved checkpoint, ascending.
    pub fn epochs(&self) -> Vec<u64> {
        self.checkpoints
            .lock()
            .map_or_else(|_| Vec::new(), |map| map.keys().copied().collect())
    }

    /// Number of saved checkpoints.
    pub fn len(&self) -> usize {
        self.checkpoints.lock().map_or(0, |map| map.len())
    }

    /// Whether nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceAdapter for InMemoryPersistence {
    fn save(&mut self, epoch: u64, state: &serde_json::Value) -> Result<(), PersistenceError> {
        let mut map = self.checkpoints.lock().map_err(|e| PersistenceError::Backend {
            reason: e.to_string(),
        })?;
        map.insert(epoch, state.clone());
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<serde_json::Value>, PersistenceError> {
        let map = self.checkpoints.lock().map_err(|e| PersistenceError::Backend {
            reason: e.to_string(),
        })?;
        Ok(map.values().next_back().cloned())
    }
}
