//! Error types for the `concord-topology` crate.
//!
//! [`TopologyError::InvalidWeight`] and [`TopologyError::UnknownNode`] are
//! caller mistakes and leave the graph untouched. [`TopologyError::CorruptedGraph`]
//! means the adjacency structure itself is inconsistent and is fatal.

use concord_types::AgentId;

/// Errors that can occur during topology operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    /// An edge weight was negative or not finite.
    #[error("invalid edge weight {weight} between {a} and {b}")]
    InvalidWeight {
        /// First endpoint.
        a: AgentId,
        /// Second endpoint.
        b: AgentId,
        /// The rejected weight.
        weight: f64,
    },

    /// A node referenced by an operation is not in the graph.
    #[error("node not found: {0}")]
    UnknownNode(AgentId),

    /// A decay or attenuation parameter was outside its valid range.
    #[error("invalid {name}: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The adjacency structure violated its invariants during traversal.
    #[error("corrupted interaction graph: {reason}")]
    CorruptedGraph {
        /// What was inconsistent.
        reason: String,
    },
}
