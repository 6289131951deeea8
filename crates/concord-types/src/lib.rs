//! Shared type definitions for the Concord synchronization core.
//!
//! This crate is the single source of truth for the identifiers and value
//! types exchanged between the memory store, the topology manager, the
//! message bus, and the orchestrator. The replicated value types derive
//! `ts-rs` so external visualization tooling can consume snapshots with
//! generated `TypeScript` bindings.
//!
//! # Modules
//!
//! - [`ids`] -- Agent identifiers and UUID-backed occurrence identifiers
//! - [`entry`] -- Memory entries, their composite key, and raw peer form
//! - [`personality`] -- Validated fixed-field agent personality

pub mod entry;
pub mod ids;
pub mod personality;

pub use entry::{EntryKey, EntryValidationError, MemoryEntry, RawMemoryEntry};
pub use ids::{AgentId, HandoffId, RunId};
pub use personality::{Personality, PersonalityError, PersonalityFields};
