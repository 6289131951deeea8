//! Memory entries and their composite key.
//!
//! A [`MemoryEntry`] is the unit replicated between agent memory stores. Its
//! identity is the [`EntryKey`] `(origin_id, sequence)`, unique across every
//! replica of a store. Peers hand entries over in loosely-typed form
//! ([`RawMemoryEntry`]); conversion into a typed entry is the validation step.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::AgentId;

/// Composite key identifying a memory entry across all replicas.
///
/// Ordering is `(origin_id, sequence)`, which is also the order entries are
/// serialized in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct EntryKey {
    /// The agent that originally produced the entry.
    pub origin_id: AgentId,
    /// Per-origin sequence number, assigned by the origin.
    pub sequence: u64,
}

impl EntryKey {
    /// Build a key from its parts.
    pub const fn new(origin_id: AgentId, sequence: u64) -> Self {
        Self {
            origin_id,
            sequence,
        }
    }
}

impl core::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.origin_id, self.sequence)
    }
}

/// A single replicated memory entry.
///
/// `timestamp` is a logical clock value supplied by the orchestrator, not
/// wall-clock time, so eviction decisions are reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MemoryEntry {
    /// The agent that originally produced the entry.
    pub origin_id: AgentId,
    /// Per-origin sequence number.
    pub sequence: u64,
    /// Logical timestamp used for age-based eviction.
    pub timestamp: u64,
    /// Opaque payload. `null` is treated as a missing payload.
    pub payload: serde_json::Value,
}

impl MemoryEntry {
    /// Create a new entry.
    pub const fn new(
        origin_id: AgentId,
        sequence: u64,
        timestamp: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            origin_id,
            sequence,
            timestamp,
            payload,
        }
    }

    /// The entry's composite key.
    pub const fn key(&self) -> EntryKey {
        EntryKey::new(self.origin_id, self.sequence)
    }

    /// Check the structural requirements a typed entry can still violate.
    ///
    /// # Errors
    ///
    /// Returns [`EntryValidationError::MissingField`] if the payload is `null`.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.payload.is_null() {
            return Err(EntryValidationError::MissingField {
                field: "payload",
                key: Some(self.key()),
            });
        }
        Ok(())
    }
}

/// Reasons a peer-supplied entry is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryValidationError {
    /// A required field was absent (or `null`).
    #[error("memory entry missing required field `{field}` (key: {key:?})")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// The entry key, when both key parts were present.
        key: Option<EntryKey>,
    },

    /// The value was not a JSON object with the expected field types.
    #[error("malformed memory entry: {reason}")]
    Malformed {
        /// Description of the structural problem.
        reason: String,
    },
}

/// Loosely-typed memory entry as received from a peer or a checkpoint.
///
/// Every field is optional so that a structurally incomplete entry can be
/// parsed, reported, and dropped instead of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMemoryEntry {
    /// The producing agent.
    #[serde(default)]
    pub origin_id: Option<AgentId>,
    /// Per-origin sequence number.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Logical timestamp.
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Payload; `null` deserializes as `None`.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl RawMemoryEntry {
    /// Parse a raw entry from an arbitrary JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EntryValidationError::Malformed`] if the value is not an
    /// object or a present field has the wrong type.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, EntryValidationError> {
        if !value.is_object() {
            return Err(EntryValidationError::Malformed {
                reason: format!("expected object, found {}", json_kind(value)),
            });
        }
        Self::deserialize(value).map_err(|e| EntryValidationError::Malformed {
            reason: e.to_string(),
        })
    }
}

impl From<MemoryEntry> for RawMemoryEntry {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            origin_id: Some(entry.origin_id),
            sequence: Some(entry.sequence),
            timestamp: Some(entry.timestamp),
            payload: Some(entry.payload),
        }
    }
}

impl TryFrom<RawMemoryEntry> for MemoryEntry {
    type Error = EntryValidationError;

    fn try_from(raw: RawMemoryEntry) -> Result<Self, Self::Error> {
        let key = match (raw.origin_id, raw.sequence) {
            (Some(origin), Some(seq)) => Some(EntryKey::new(origin, seq)),
            _ => None,
        };
        let origin_id = raw.origin_id.ok_or(EntryValidationError::MissingField {
            field: "origin_id",
            key,
        })?;
        let sequence = raw.sequence.ok_or(EntryValidationError::MissingField {
            field: "sequence",
            key,
        })?;
        let timestamp = raw.timestamp.ok_or(EntryValidationError::MissingField {
            field: "timestamp",
            key,
        })?;
        let payload = raw
            .payload
            .filter(|p| !p.is_null())
            .ok_or(EntryValidationError::MissingField {
                field: "payload",
                key,
            })?;
        Ok(Self {
            origin_id,
            sequence,
            timestamp,
            payload,
        })
    }
}

/// Short name of a JSON value's kind, for error messages.
const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_orders_by_origin_then_sequence() {
        let a = EntryKey::new(AgentId(1), 9);
        let b = EntryKey::new(AgentId(2), 0);
        let c = EntryKey::new(AgentId(2), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn entry_serializes_with_flat_fields() {
        let entry = MemoryEntry::new(AgentId(4), 2, 17, json!({"saw": "river"}));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({"origin_id": 4, "sequence": 2, "timestamp": 17, "payload": {"saw": "river"}})
        );
    }

    #[test]
    fn null_payload_fails_validation() {
        let entry = MemoryEntry::new(AgentId(1), 0, 0, serde_json::Value::Null);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn raw_entry_with_all_fields_converts() {
        let raw = RawMemoryEntry::from_value(&json!({
            "origin_id": 3, "sequence": 1, "timestamp": 5, "payload": "hello"
        }))
        .unwrap();
        let entry = MemoryEntry::try_from(raw).unwrap();
        assert_eq!(entry.key(), EntryKey::new(AgentId(3), 1));
    }

    #[test]
    fn raw_entry_missing_sequence_is_rejected() {
        let raw = RawMemoryEntry::from_value(&json!({
            "origin_id": 3, "timestamp": 5, "payload": "hello"
        }))
        .unwrap();
        let err = MemoryEntry::try_from(raw).unwrap_err();
        assert!(matches!(
            err,
            EntryValidationError::MissingField { field: "sequence", .. }
        ));
    }

    #[test]
    fn raw_entry_null_payload_is_rejected() {
        let raw = RawMemoryEntry::from_value(&json!({
            "origin_id": 3, "sequence": 0, "timestamp": 5, "payload": null
        }))
        .unwrap();
        let err = MemoryEntry::try_from(raw).unwrap_err();
        assert!(matches!(
            err,
            EntryValidationError::MissingField { field: "payload", .. }
        ));
    }

    #[test]
    fn non_object_is_malformed() {
        let err = RawMemoryEntry::from_value(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, EntryValidationError::Malformed { .. }));
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let err = RawMemoryEntry::from_value(&json!({"origin_id": "seven"})).unwrap_err();
        assert!(matches!(err, EntryValidationError::Malformed { .. }));
    }
}
