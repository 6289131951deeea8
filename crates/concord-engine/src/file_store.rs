//! Checkpoints as JSON files in a directory.
//!
//! One file per checkpoint, named `epoch-<N>.json` with `N` zero-padded to
//! six digits. Writes go to a temporary file first and are renamed into
//! place, so a crash mid-write never leaves a truncated checkpoint behind.

use std::fs;
use std::path::{Path, PathBuf};

use concord_core::{PersistenceAdapter, PersistenceError};
use tracing::debug;

const PREFIX: &str = "epoch-";
const SUFFIX: &str = ".json";

/// File-backed [`PersistenceAdapter`].
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    /// Use `dir` for checkpoints, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, epoch: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{epoch:06}{SUFFIX}"))
    }

    /// Epochs with a checkpoint on disk, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the directory cannot be listed.
    pub fn epochs(&self) -> Result<Vec<u64>, PersistenceError> {
        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            if let Some(epoch) = name.to_str().and_then(parse_epoch) {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }
}

fn parse_epoch(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

impl PersistenceAdapter for JsonFilePersistence {
    fn save(&mut self, epoch: u64, state: &serde_json::Value) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| PersistenceError::Serialization {
            reason: e.to_string(),
        })?;
        let path = self.path_for(epoch);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "Checkpoint written");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<serde_json::Value>, PersistenceError> {
        let Some(epoch) = self.epochs()?.last().copied() else {
            return Ok(None);
        };
        let path = self.path_for(epoch);
        let contents = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&contents).map_err(|e| PersistenceError::Serialization {
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(value))
    }
}
