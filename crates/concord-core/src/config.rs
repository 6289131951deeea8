//! Configuration loading and typed config structures for a Concord run.
//!
//! The canonical configuration lives in `concord-config.yaml`. Every field
//! has a default, so an empty document (or no file at all) yields a runnable
//! configuration. The configuration is also persisted verbatim inside every
//! checkpoint, which is why it serializes as well as deserializes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use concord_bus::{BackpressurePolicy, DEFAULT_QUEUE_CAPACITY};
use concord_topology::Attenuation;

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "CONCORD_LOG";

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its valid range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level run configuration.
///
/// Mirrors the structure of `concord-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Run identity and seed.
    #[serde(default)]
    pub world: WorldConfig,

    /// Epoch bounds and checkpoint cadence.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// Per-agent memory store settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Interaction-graph settings.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Initial population.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CONCORD_LOG` overrides `logging.level`. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every range constraint.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.capacity == 0 {
            return Err(invalid("memory.capacity", "must be at least 1"));
        }
        if self.topology.check_interval == 0 {
            return Err(invalid("topology.check_interval", "must be at least 1"));
        }
        if let Err(e) = self.topology.attenuation.validate() {
            return Err(invalid("topology.attenuation", e.to_string()));
        }
        let decay = self.topology.edge_decay;
        if !(decay.is_finite() && decay > 0.0 && decay <= 1.0) {
            return Err(invalid("topology.edge_decay", format!("{decay} is outside (0, 1]")));
        }
        let prune = self.topology.prune_below;
        if !(prune.is_finite() && prune >= 0.0) {
            return Err(invalid("topology.prune_below", format!("{prune} is negative")));
        }
        let weight = self.topology.interaction_weight;
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(invalid(
                "topology.interaction_weight",
                format!("{weight} is negative"),
            ));
        }
        if self.bus.queue_capacity == 0 {
            return Err(invalid("bus.queue_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Final epoch count a run of this configuration targets.
    ///
    /// `num_epochs`, further limited by `max_epochs` when set.
    pub fn target_epochs(&self) -> u64 {
        self.simulation
            .max_epochs
            .map_or(self.simulation.num_epochs, |max| {
                self.simulation.num_epochs.min(max)
            })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Run identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Human-readable run name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Epoch bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Number of epochs a full run executes.
    #[serde(default = "default_num_epochs")]
    pub num_epochs: u64,

    /// Optional hard cap on epochs, applied on top of `num_epochs`.
    #[serde(default)]
    pub max_epochs: Option<u64>,

    /// Save a checkpoint every this many epochs (0 = never).
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

impl Default for SimulationBoundsConfig {
    fn default() -> Self {
        Self {
            num_epochs: default_num_epochs(),
            max_epochs: None,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Memory store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum entries per agent store.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Interaction-graph settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Run the fragmentation check every this many epochs.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Resonance attenuation per hop.
    #[serde(default)]
    pub attenuation: Attenuation,

    /// Multiplier applied to every edge weight at the end of each epoch.
    #[serde(default = "default_edge_decay")]
    pub edge_decay: f64,

    /// Edges lighter than this after decay are removed.
    #[serde(default = "default_prune_below")]
    pub prune_below: f64,

    /// Weight added to an edge per recorded interaction.
    #[serde(default = "default_interaction_weight")]
    pub interaction_weight: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            attenuation: Attenuation::default(),
            edge_decay: default_edge_decay(),
            prune_below: default_prune_below(),
            interaction_weight: default_interaction_weight(),
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bound on pending messages per topic.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Behaviour when a topic queue is full.
    #[serde(default = "default_backpressure")]
    pub backpressure: BackpressurePolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: default_backpressure(),
        }
    }
}

/// How initial agent personalities are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityMode {
    /// Every agent gets the balanced personality.
    Balanced,
    /// Personalities are drawn from the run seed.
    #[default]
    Seeded,
}

/// Initial population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Number of agents created at initialization.
    #[serde(default = "default_agent_count")]
    pub count: u64,

    /// Personality assignment.
    #[serde(default)]
    pub personality: PersonalityMode,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            count: default_agent_count(),
            personality: PersonalityMode::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Apply the `CONCORD_LOG` override, if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV) {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    String::from("Concord")
}

const fn default_seed() -> u64 {
    42
}

const fn default_num_epochs() -> u64 {
    100
}

const fn default_checkpoint_interval() -> u64 {
    10
}

const fn default_capacity() -> usize {
    64
}

const fn default_check_interval() -> u64 {
    5
}

const fn default_edge_decay() -> f64 {
    0.9
}

const fn default_prune_below() -> f64 {
    0.05
}

const fn default_interaction_weight() -> f64 {
    1.0
}

const fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

const fn default_backpressure() -> BackpressurePolicy {
    BackpressurePolicy::DropOldest
}

const fn default_agent_count() -> u64 {
    8
}

fn default_log_level() -> String {
    String::from("info")
}
