//! Per-agent memory store: arena storage, key index, and age-ordered eviction.
//!
//! ## Layout
//!
//! Entries live in a dense arena (`Vec<MemoryEntry>`). A hash index maps each
//! [`EntryKey`] to its arena slot, so key lookups during a merge are O(1). An
//! ordered set of `(timestamp, key)` pairs tracks age; eviction pops from its
//! front. Removal swaps the last arena slot into the hole and patches the
//! index.
//!
//! ## Convergence
//!
//! Two rules make [`MemoryStore::merge`] a join:
//!
//! - **Per-key resolution**: when both sides hold the same key with different
//!   content, the entry with the larger timestamp wins; equal timestamps fall
//!   back to the canonical JSON text of the payload. Identical entries are a
//!   no-op, which gives idempotence.
//! - **Eviction order**: entries are ranked by `(timestamp, origin_id,
//!   sequence)`, a total order that never depends on insertion history. The
//!   store keeps the `capacity` highest-ranked entries. Per-key resolution
//!   only ever raises an entry's rank, so keeping the top `capacity` of a
//!   union commutes and associates with further unions.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use concord_types::{AgentId, EntryKey, MemoryEntry, RawMemoryEntry};

use crate::error::MemoryError;

/// Position of an entry in eviction order; smallest is evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AgeKey {
    timestamp: u64,
    key: EntryKey,
}

impl AgeKey {
    const fn of(entry: &MemoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            key: entry.key(),
        }
    }
}

/// What happened to a single entry offered to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The key was new and the entry was stored.
    Inserted,
    /// The key existed and the offered entry won per-key resolution.
    Replaced,
    /// The key existed and the stored entry was kept.
    Unchanged,
}

/// Summary of one merge (or raw merge) pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entries with keys the store did not hold.
    pub inserted: usize,
    /// Existing entries replaced by a winning remote version.
    pub replaced: usize,
    /// Offered entries identical to (or losing against) the stored version.
    pub unchanged: usize,
    /// Offered entries dropped for failing validation.
    pub dropped_invalid: usize,
    /// Entries evicted to restore the capacity bound.
    pub evicted: usize,
}

impl MergeReport {
    /// Whether the merge changed the store at all.
    pub const fn changed(&self) -> bool {
        self.inserted > 0 || self.replaced > 0 || self.evicted > 0
    }
}

/// Serializable form of a [`MemoryStore`].
///
/// `entries` is ordered by key; `next_sequence` is the owner's sequence
/// high-water mark so local appends never reuse a key after a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// The owning agent.
    pub owner: AgentId,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Next sequence number for locally produced entries.
    pub next_sequence: u64,
    /// All entries, ordered by key.
    pub entries: Vec<MemoryEntry>,
}

/// Bounded, conflict-free replicated collection of memory entries.
///
/// Owned by exactly one agent. Mutated only through
/// [`add_memory`](Self::add_memory) (and its local convenience
/// [`record`](Self::record)) and [`merge`](Self::merge) /
/// [`merge_raw`](Self::merge_raw). After each of those calls
/// `len() <= capacity()` holds.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    owner: AgentId,
    capacity: usize,
    next_sequence: u64,
    /// Dense entry arena.
    slots: Vec<MemoryEntry>,
    /// Key to arena slot.
    index: HashMap<EntryKey, usize>,
    /// Eviction order.
    by_age: BTreeSet<AgeKey>,
}

impl MemoryStore {
    /// Create an empty store for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(owner: AgentId, capacity: usize) -> Result<Self, MemoryError> {
        if capacity == 0 {
            return Err(MemoryError::InvalidCapacity { capacity });
        }
        Ok(Self {
            owner,
            capacity,
            next_sequence: 0,
            slots: Vec::new(),
            index: HashMap::new(),
            by_age: BTreeSet::new(),
        })
    }

    /// Rebuild a store from persisted parts.
    ///
    /// Restoration is strict: unlike [`merge`](Self::merge), an invalid entry,
    /// a repeated key, or more entries than `capacity` fails the whole
    /// restore, because it means the checkpoint itself is corrupt.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidCapacity`] for zero capacity
    /// - [`MemoryError::InvalidEntry`] for an entry failing validation
    /// - [`MemoryError::DuplicateKey`] for a repeated key
    /// - [`MemoryError::CapacityViolation`] if entries exceed capacity
    pub fn from_parts(
        owner: AgentId,
        capacity: usize,
        next_sequence: u64,
        entries: Vec<MemoryEntry>,
    ) -> Result<Self, MemoryError> {
        let mut store = Self::new(owner, capacity)?;
        if entries.len() > capacity {
            return Err(MemoryError::CapacityViolation {
                owner,
                size: entries.len(),
                capacity,
            });
        }
        for entry in entries {
            entry.validate()?;
            let key = entry.key();
            if store.index.contains_key(&key) {
                return Err(MemoryError::DuplicateKey { key });
            }
            store.note_sequence(&entry);
            store.upsert(entry);
        }
        store.next_sequence = store.next_sequence.max(next_sequence);
        Ok(store)
    }

    /// Rebuild a store from a [`StoreSnapshot`].
    ///
    /// # Errors
    ///
    /// See [`from_parts`](Self::from_parts).
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, MemoryError> {
        Self::from_parts(
            snapshot.owner,
            snapshot.capacity,
            snapshot.next_sequence,
            snapshot.entries,
        )
    }

    /// Decode a store from its dictionary form (see [`to_dict`](Self::to_dict)).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Malformed`] if the value does not decode, or any
    /// error from [`from_parts`](Self::from_parts).
    pub fn from_dict(value: &serde_json::Value) -> Result<Self, MemoryError> {
        let snapshot =
            StoreSnapshot::deserialize(value).map_err(|e| MemoryError::Malformed {
                reason: e.to_string(),
            })?;
        Self::from_snapshot(snapshot)
    }

    /// Encode the store in dictionary form.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Malformed`] if a payload cannot be encoded.
    pub fn to_dict(&self) -> Result<serde_json::Value, MemoryError> {
        serde_json::to_value(self.snapshot()).map_err(|e| MemoryError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Capture the store as a serializable snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            owner: self.owner,
            capacity: self.capacity,
            next_sequence: self.next_sequence,
            entries: self.entries().into_iter().cloned().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert (or resolve against) an entry, then enforce capacity.
    ///
    /// If the store is over capacity afterwards, the oldest entries are
    /// evicted until it is exactly at capacity. The offered entry itself is
    /// evicted immediately when it is older than everything already held in
    /// a full store.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidEntry`] if the entry fails validation; the
    ///   store is untouched and the caller is expected to log and continue.
    /// - [`MemoryError::CapacityViolation`] if the bound does not hold after
    ///   enforcement.
    pub fn add_memory(&mut self, entry: MemoryEntry) -> Result<Upsert, MemoryError> {
        entry.validate()?;
        self.note_sequence(&entry);
        let outcome = self.upsert(entry);
        let evicted = self.enforce_capacity();
        if evicted > 0 {
            debug!(owner = %self.owner, evicted, "memory store evicted oldest entries");
        }
        self.check_capacity()?;
        Ok(outcome)
    }

    /// Append a locally produced entry under the next owner sequence number.
    ///
    /// Returns the key assigned to the new entry.
    ///
    /// # Errors
    ///
    /// Same as [`add_memory`](Self::add_memory).
    pub fn record(
        &mut self,
        timestamp: u64,
        payload: serde_json::Value,
    ) -> Result<EntryKey, MemoryError> {
        let entry = MemoryEntry::new(self.owner, self.next_sequence, timestamp, payload);
        let key = entry.key();
        self.add_memory(entry)?;
        Ok(key)
    }

    /// Merge another replica into this one.
    ///
    /// Computes the key-wise union (resolving shared keys as described in the
    /// module docs), drops structurally invalid entries with a warning, and
    /// evicts down to this store's capacity. `other` is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::CapacityViolation`] only if the capacity bound
    /// fails after enforcement.
    pub fn merge(&mut self, other: &Self) -> Result<MergeReport, MemoryError> {
        let mut report = MergeReport::default();
        for entry in &other.slots {
            if let Err(err) = entry.validate() {
                warn!(owner = %self.owner, key = %entry.key(), error = %err,
                    "dropping invalid memory entry during merge");
                report.dropped_invalid = report.dropped_invalid.saturating_add(1);
                continue;
            }
            self.note_sequence(entry);
            tally(&mut report, self.upsert(entry.clone()));
        }
        self.finish_merge(other.owner.to_string(), report)
    }

    /// Merge loosely-typed entries received from a peer.
    ///
    /// Each value is parsed and validated independently; entries missing a
    /// required field (or not shaped like an entry at all) are dropped with a
    /// warning and the rest of the batch is merged.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::CapacityViolation`] only if the capacity bound
    /// fails after enforcement.
    pub fn merge_raw(
        &mut self,
        values: &[serde_json::Value],
    ) -> Result<MergeReport, MemoryError> {
        let mut report = MergeReport::default();
        for value in values {
            let parsed = RawMemoryEntry::from_value(value).and_then(MemoryEntry::try_from);
            match parsed {
                Ok(entry) => {
                    self.note_sequence(&entry);
                    tally(&mut report, self.upsert(entry));
                }
                Err(err) => {
                    warn!(owner = %self.owner, error = %err,
                        "dropping invalid memory entry during merge");
                    report.dropped_invalid = report.dropped_invalid.saturating_add(1);
                }
            }
        }
        self.finish_merge(String::from("raw"), report)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The `n` most recent entries, newest first.
    pub fn retrieve_recent(&self, n: usize) -> Vec<&MemoryEntry> {
        self.by_age
            .iter()
            .rev()
            .take(n)
            .filter_map(|age| self.get(&age.key))
            .collect()
    }

    /// All entries produced by `origin`, ordered by sequence.
    pub fn retrieve_by_origin(&self, origin: AgentId) -> Vec<&MemoryEntry> {
        let mut found: Vec<&MemoryEntry> = self
            .slots
            .iter()
            .filter(|e| e.origin_id == origin)
            .collect();
        found.sort_by_key(|e| e.sequence);
        found
    }

    /// All entries ordered by key.
    pub fn entries(&self) -> Vec<&MemoryEntry> {
        let mut all: Vec<&MemoryEntry> = self.slots.iter().collect();
        all.sort_by_key(|e| e.key());
        all
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &EntryKey) -> Option<&MemoryEntry> {
        self.index.get(key).and_then(|&slot| self.slots.get(slot))
    }

    /// Whether an entry with `key` is held.
    pub fn contains(&self, key: &EntryKey) -> bool {
        self.index.contains_key(key)
    }

    /// The owning agent.
    pub const fn owner(&self) -> AgentId {
        self.owner
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number the next [`record`](Self::record) call will use.
    pub const fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Number of entries held.
    pub const fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no entries.
    pub const fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn upsert(&mut self, entry: MemoryEntry) -> Upsert {
        let key = entry.key();
        let Some(&slot) = self.index.get(&key) else {
            self.by_age.insert(AgeKey::of(&entry));
            self.index.insert(key, self.slots.len());
            self.slots.push(entry);
            return Upsert::Inserted;
        };
        let Some(existing) = self.slots.get_mut(slot) else {
            return Upsert::Unchanged;
        };
        if !supersedes(&entry, existing) {
            return Upsert::Unchanged;
        }
        self.by_age.remove(&AgeKey::of(existing));
        self.by_age.insert(AgeKey::of(&entry));
        *existing = entry;
        Upsert::Replaced
    }

    /// Evict oldest entries until the bound holds. Returns the eviction count.
    fn enforce_capacity(&mut self) -> usize {
        let mut evicted: usize = 0;
        while self.slots.len() > self.capacity {
            let Some(oldest) = self.by_age.pop_first() else {
                break;
            };
            if self.remove_slot(&oldest.key).is_some() {
                evicted = evicted.saturating_add(1);
            }
        }
        evicted
    }

    fn remove_slot(&mut self, key: &EntryKey) -> Option<MemoryEntry> {
        let slot = self.index.remove(key)?;
        if slot >= self.slots.len() {
            return None;
        }
        let removed = self.slots.swap_remove(slot);
        if let Some(moved) = self.slots.get(slot) {
            self.index.insert(moved.key(), slot);
        }
        Some(removed)
    }

    fn check_capacity(&self) -> Result<(), MemoryError> {
        let size = self.slots.len();
        if size > self.capacity || self.index.len() != size || self.by_age.len() != size {
            return Err(MemoryError::CapacityViolation {
                owner: self.owner,
                size,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn note_sequence(&mut self, entry: &MemoryEntry) {
        if entry.origin_id == self.owner {
            self.next_sequence = self
                .next_sequence
                .max(entry.sequence.saturating_add(1));
        }
    }

    fn finish_merge(
        &mut self,
        peer: String,
        mut report: MergeReport,
    ) -> Result<MergeReport, MemoryError> {
        report.evicted = self.enforce_capacity();
        self.check_capacity()?;
        if report.changed() || report.dropped_invalid > 0 {
            debug!(
                owner = %self.owner,
                peer,
                inserted = report.inserted,
                replaced = report.replaced,
                unchanged = report.unchanged,
                dropped_invalid = report.dropped_invalid,
                evicted = report.evicted,
                size = self.slots.len(),
                "memory merge"
            );
        }
        Ok(report)
    }
}

impl PartialEq for MemoryStore {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.capacity == other.capacity
            && self.next_sequence == other.next_sequence
            && self.entries() == other.entries()
    }
}

/// Whether `candidate` wins per-key resolution against `current`.
fn supersedes(candidate: &MemoryEntry, current: &MemoryEntry) -> bool {
    match candidate.timestamp.cmp(&current.timestamp) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            canonical(&candidate.payload) > canonical(&current.payload)
        }
    }
}

/// Canonical text of a payload. Object keys serialize in sorted order.
fn canonical(payload: &serde_json::Value) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

fn tally(report: &mut MergeReport, outcome: Upsert) {
    match outcome {
        Upsert::Inserted => report.inserted = report.inserted.saturating_add(1),
        Upsert::Replaced => report.replaced = report.replaced.saturating_add(1),
        Upsert::Unchanged => report.unchanged = report.unchanged.saturating_add(1),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(origin: u64, seq: u64, ts: u64) -> MemoryEntry {
        MemoryEntry::new(AgentId(origin), seq, ts, json!({"n": seq}))
    }

    fn store(owner: u64, capacity: usize) -> MemoryStore {
        MemoryStore::new(AgentId(owner), capacity).unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            MemoryStore::new(AgentId(1), 0),
            Err(MemoryError::InvalidCapacity { capacity: 0 })
        ));
    }

    #[test]
    fn add_five_with_capacity_three_keeps_latest_three() {
        let mut s = store(1, 3);
        for i in 0..5 {
            s.add_memory(entry(1, i, i)).unwrap();
            assert!(s.len() <= 3);
        }
        assert_eq!(s.len(), 3);
        let kept: Vec<u64> = s.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn stale_entry_into_full_store_is_evicted_immediately() {
        let mut s = store(1, 2);
        s.add_memory(entry(1, 0, 10)).unwrap();
        s.add_memory(entry(1, 1, 11)).unwrap();
        s.add_memory(entry(2, 0, 1)).unwrap();
        assert_eq!(s.len(), 2);
        assert!(!s.contains(&EntryKey::new(AgentId(2), 0)));
    }

    #[test]
    fn invalid_entry_is_rejected_without_mutation() {
        let mut s = store(1, 3);
        let bad = MemoryEntry::new(AgentId(1), 0, 0, serde_json::Value::Null);
        let err = s.add_memory(bad).unwrap_err();
        assert!(err.is_recoverable());
        assert!(s.is_empty());
    }

    #[test]
    fn record_assigns_increasing_sequences() {
        let mut s = store(7, 10);
        let a = s.record(1, json!("a")).unwrap();
        let b = s.record(2, json!("b")).unwrap();
        assert_eq!(a, EntryKey::new(AgentId(7), 0));
        assert_eq!(b, EntryKey::new(AgentId(7), 1));
        assert_eq!(s.next_sequence(), 2);
    }

    #[test]
    fn duplicate_add_is_unchanged() {
        let mut s = store(1, 3);
        assert_eq!(s.add_memory(entry(1, 0, 5)).unwrap(), Upsert::Inserted);
        assert_eq!(s.add_memory(entry(1, 0, 5)).unwrap(), Upsert::Unchanged);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn newer_version_of_key_replaces() {
        let mut s = store(1, 3);
        s.add_memory(entry(2, 0, 5)).unwrap();
        let newer = MemoryEntry::new(AgentId(2), 0, 9, json!("edited"));
        assert_eq!(s.add_memory(newer).unwrap(), Upsert::Replaced);
        let held = s.get(&EntryKey::new(AgentId(2), 0)).unwrap();
        assert_eq!(held.timestamp, 9);
        let older = MemoryEntry::new(AgentId(2), 0, 1, json!("stale"));
        assert_eq!(s.add_memory(older).unwrap(), Upsert::Unchanged);
    }

    #[test]
    fn merge_disjoint_stores_unions() {
        let mut a = store(1, 10);
        let mut b = store(2, 10);
        a.add_memory(entry(1, 0, 1)).unwrap();
        a.add_memory(entry(1, 1, 2)).unwrap();
        b.add_memory(entry(2, 0, 1)).unwrap();
        b.add_memory(entry(2, 1, 2)).unwrap();
        b.add_memory(entry(2, 2, 3)).unwrap();

        let report = a.merge(&b).unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn merge_with_self_copy_is_noop() {
        let mut a = store(1, 4);
        for i in 0..6 {
            a.add_memory(entry(1, i, i)).unwrap();
        }
        let before = a.clone();
        let report = a.merge(&before).unwrap();
        assert!(!report.changed());
        assert_eq!(a, before);
    }

    #[test]
    fn merge_is_commutative_under_eviction() {
        let mut a = store(1, 3);
        let mut b = store(1, 3);
        for (origin, seq, ts) in [(1, 0, 1), (1, 1, 4), (3, 0, 6)] {
            a.add_memory(entry(origin, seq, ts)).unwrap();
        }
        for (origin, seq, ts) in [(2, 0, 2), (2, 1, 5), (3, 0, 6)] {
            b.add_memory(entry(origin, seq, ts)).unwrap();
        }
        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab.entries(), ba.entries());
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn merge_raw_drops_invalid_and_keeps_rest() {
        let mut s = store(1, 10);
        let values = vec![
            json!({"origin_id": 2, "sequence": 0, "timestamp": 1, "payload": "ok"}),
            json!({"origin_id": 2, "timestamp": 2, "payload": "no sequence"}),
            json!("not an entry"),
            json!({"origin_id": 2, "sequence": 1, "timestamp": 3, "payload": null}),
            json!({"origin_id": 3, "sequence": 0, "timestamp": 4, "payload": [1]}),
        ];
        let report = s.merge_raw(&values).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.dropped_invalid, 3);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn merge_advances_owner_sequence() {
        let mut mine = store(1, 10);
        let mut replica = store(2, 10);
        replica.add_memory(entry(1, 8, 1)).unwrap();
        mine.merge(&replica).unwrap();
        assert_eq!(mine.next_sequence(), 9);
    }

    #[test]
    fn retrieve_recent_newest_first() {
        let mut s = store(1, 10);
        for i in 0..5 {
            s.add_memory(entry(1, i, i.saturating_mul(10))).unwrap();
        }
        let recent: Vec<u64> = s.retrieve_recent(2).iter().map(|e| e.sequence).collect();
        assert_eq!(recent, vec![4, 3]);
        assert_eq!(s.retrieve_recent(50).len(), 5);
    }

    #[test]
    fn retrieve_by_origin_sorted_by_sequence() {
        let mut s = store(1, 10);
        s.add_memory(entry(2, 5, 1)).unwrap();
        s.add_memory(entry(1, 0, 2)).unwrap();
        s.add_memory(entry(2, 1, 3)).unwrap();
        let seqs: Vec<u64> = s
            .retrieve_by_origin(AgentId(2))
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 5]);
        assert!(s.retrieve_by_origin(AgentId(9)).is_empty());
    }

    #[test]
    fn dict_round_trip_preserves_everything() {
        let mut s = store(4, 5);
        s.record(3, json!({"a": 1})).unwrap();
        s.add_memory(entry(9, 2, 7)).unwrap();
        s.record(8, json!([true, 2.5])).unwrap();
        let dict = s.to_dict().unwrap();
        let back = MemoryStore::from_dict(&dict).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.capacity(), 5);
        assert_eq!(back.next_sequence(), 2);
    }

    #[test]
    fn from_parts_rejects_over_capacity() {
        let entries = vec![entry(1, 0, 0), entry(1, 1, 1), entry(1, 2, 2)];
        let err = MemoryStore::from_parts(AgentId(1), 2, 0, entries).unwrap_err();
        assert!(matches!(err, MemoryError::CapacityViolation { size: 3, .. }));
    }

    #[test]
    fn from_parts_rejects_duplicate_keys() {
        let entries = vec![entry(1, 0, 0), entry(1, 0, 1)];
        let err = MemoryStore::from_parts(AgentId(1), 5, 0, entries).unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateKey { .. }));
    }

    #[test]
    fn from_dict_rejects_garbage() {
        let err = MemoryStore::from_dict(&json!({"owner": "x"})).unwrap_err();
        assert!(matches!(err, MemoryError::Malformed { .. }));
    }

    #[test]
    fn eviction_keeps_index_consistent_after_swap_remove() {
        let mut s = store(1, 2);
        s.add_memory(entry(1, 0, 3)).unwrap();
        s.add_memory(entry(1, 1, 1)).unwrap();
        s.add_memory(entry(1, 2, 2)).unwrap();
        // seq 1 (ts 1) was evicted; the remaining two must still resolve.
        assert!(s.get(&EntryKey::new(AgentId(1), 0)).is_some());
        assert!(s.get(&EntryKey::new(AgentId(1), 2)).is_some());
        assert!(s.get(&EntryKey::new(AgentId(1), 1)).is_none());
    }
}
