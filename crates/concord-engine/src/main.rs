//! Engine binary for Concord.
//!
//! Wires the orchestrator to a file-backed checkpoint store and the process
//! lifecycle, then runs the epoch loop until it completes or is cancelled.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `concord-config.yaml` (or defaults)
//! 2. Initialize structured logging (tracing)
//! 3. Open the checkpoint directory
//! 4. Resume from the latest checkpoint, or start a fresh run
//! 5. Map Ctrl-C to the cancellation flag
//! 6. Run the epoch loop on a blocking task
//! 7. Log the result

mod error;
mod file_store;

use std::path::Path;

use concord_core::{DefaultAgentFactory, Orchestrator, SimulationConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::file_store::JsonFilePersistence;

/// Configuration file, relative to the working directory.
const CONFIG_PATH: &str = "concord-config.yaml";

/// Checkpoint directory, relative to the working directory.
const CHECKPOINT_DIR: &str = "checkpoints";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("concord-engine starting");
    if !from_file {
        info!(path = CONFIG_PATH, "Config file not found, using defaults");
    }
    info!(
        world_name = %config.world.name,
        seed = config.world.seed,
        agents = config.agents.count,
        target_epochs = config.target_epochs(),
        log_level = %config.logging.level,
        "Configuration loaded"
    );

    // 3. Open the checkpoint store.
    let store = JsonFilePersistence::new(CHECKPOINT_DIR)?;
    info!(dir = %store.dir().display(), "Checkpoint store ready");

    // 4. Resume or start fresh.
    let mut orchestrator =
        Orchestrator::restore_or_new(config, DefaultAgentFactory::new(), store)
            .map_err(EngineError::from)?;

    // 5. Ctrl-C requests a stop at the next epoch boundary.
    let cancel = orchestrator.cancellation_flag();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current epoch");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    // 6. Run. The epoch loop is synchronous and CPU-bound.
    let result = tokio::task::spawn_blocking(move || orchestrator.run())
        .await
        .map_err(|e| EngineError::Join {
            message: e.to_string(),
        })?
        .map_err(EngineError::from)?;

    // 7. Log results.
    info!(
        end_reason = ?result.end_reason,
        completed = result.simulation_completed,
        epochs_executed = result.epochs_executed,
        "concord-engine shutdown complete"
    );

    Ok(())
}

/// Load the run configuration from `concord-config.yaml`.
///
/// Returns the configuration and whether it came from the file.
fn load_config() -> Result<(SimulationConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        let config = SimulationConfig::from_file(config_path)?;
        Ok((config, true))
    } else {
        let mut config = SimulationConfig::default();
        config.logging.apply_env_overrides();
        Ok((config, false))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped =
            SimulationConfig::parse(include_str!("../../../concord-config.yaml")).unwrap();
        assert_eq!(shipped, SimulationConfig::default());
    }
}
