//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and the run itself.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: concord_core::ConfigError,
    },

    /// The checkpoint directory could not be prepared.
    #[error("checkpoint store error: {source}")]
    Persistence {
        /// The underlying persistence error.
        #[from]
        source: concord_core::PersistenceError,
    },

    /// The orchestrator failed to start or to finish a run.
    #[error("orchestrator error: {source}")]
    Orchestrator {
        /// The underlying orchestrator error.
        #[from]
        source: concord_core::OrchestratorError,
    },

    /// The blocking run task panicked or was cancelled.
    #[error("run task failed: {message}")]
    Join {
        /// Description of the task failure.
        message: String,
    },
}
