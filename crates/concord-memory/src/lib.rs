//! Bounded, conflict-free replicated memory store for Concord agents.
//!
//! Each agent owns one [`MemoryStore`]. Stores converge under [`merge`]:
//! the operation is a key-wise union followed by age-based eviction down to
//! the store's capacity, and it is idempotent, commutative, and associative.
//!
//! # Modules
//!
//! - [`store`] -- The store itself, merge reports, and snapshots
//! - [`error`] -- Error types ([`MemoryError`])
//!
//! [`merge`]: MemoryStore::merge

pub mod error;
pub mod store;

pub use error::MemoryError;
pub use store::{MemoryStore, MergeReport, StoreSnapshot, Upsert};
