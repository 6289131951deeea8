//! Interaction-graph topology for the Concord synchronization core.
//!
//! Agents are nodes of an undirected weighted graph; an edge's weight is the
//! accumulated strength of recent interactions between its endpoints. This
//! crate owns the graph and the two analyses run over it: connected
//! component detection (fragmentation) and hop-attenuated signal diffusion
//! (resonance). Every traversal visits nodes in ascending id order, so
//! results are a pure function of the graph.
//!
//! # Modules
//!
//! - [`error`] -- Error types for graph mutation and traversal.
//! - [`graph`] -- [`InteractionGraph`]: symmetric adjacency with edge decay.
//! - [`partition`] -- [`ComponentPartition`] and BFS fragmentation detection.
//! - [`resonance`] -- Attenuated BFS signal propagation.
//! - [`manager`] -- [`TopologyManager`]: periodic checks and transition logging.

pub mod error;
pub mod graph;
pub mod manager;
pub mod partition;
pub mod resonance;

pub use error::TopologyError;
pub use graph::{GraphRecord, InteractionGraph};
pub use manager::{TopologyCheck, TopologyManager, TopologyTransition};
pub use partition::ComponentPartition;
pub use resonance::{Attenuation, ResonanceMap};
