//! Height-versioned contract state snapshots.
//!
//! The whole pipeline's failure atomicity comes from the clone-then-mutate-
//! then-commit pattern here: a replay cycle forks the committed snapshot,
//! mutates the fork freely, and either commits it wholesale or drops it.
//! The committed snapshot is never touched in place.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use weavestate_types::{ContractId, ExecutionMetadata, ValidityLog};

/// One tracked contract inside a snapshot.
///
/// `metadata` is shared by reference across snapshot clones (immutable after
/// creation); `state` and `validity` are deep-copied on clone.
#[derive(Debug, Clone)]
pub struct ContractEntry {
    pub metadata: Arc<ExecutionMetadata>,
    /// Opaque domain state. The cache deep-copies and serializes it without
    /// interpreting its shape.
    pub state: Value,
    pub validity: ValidityLog,
}

impl ContractEntry {
    pub fn new(metadata: Arc<ExecutionMetadata>, state: Value) -> Self {
        Self {
            metadata,
            state,
            validity: ValidityLog::new(),
        }
    }
}

/// State of the world as of a log height.
///
/// Derivable only by replaying entries with heights in `(prev, height]` over
/// the previous snapshot; `Clone` produces the working copy a replay cycle
/// mutates.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    height: u64,
    contracts: HashMap<ContractId, ContractEntry>,
}

impl Snapshot {
    /// The empty snapshot: height 0, no contracts.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_height(height: u64, contracts: HashMap<ContractId, ContractEntry>) -> Self {
        Self { height, contracts }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Raise the snapshot height. Heights never move backwards; a lower
    /// value is ignored.
    pub fn advance_height(&mut self, height: u64) {
        if height > self.height {
            self.height = height;
        }
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.contracts.contains_key(id)
    }

    pub fn get(&self, id: &ContractId) -> Option<&ContractEntry> {
        self.contracts.get(id)
    }

    pub fn get_mut(&mut self, id: &ContractId) -> Option<&mut ContractEntry> {
        self.contracts.get_mut(id)
    }

    pub fn insert(&mut self, id: ContractId, entry: ContractEntry) {
        self.contracts.insert(id, entry);
    }

    /// Tracked contract ids, sorted for deterministic fetch batching.
    pub fn contract_ids(&self) -> Vec<ContractId> {
        let mut ids: Vec<ContractId> = self.contracts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContractId, &ContractEntry)> {
        self.contracts.iter()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// The process-wide committed cache.
///
/// Read-shared between cycles; the only mutation paths are [`commit`]
/// (atomic swap at the end of a successful replay cycle) and [`replace`]
/// (wholesale import). Its height never decreases through `commit`.
///
/// [`commit`]: CommittedCache::commit
/// [`replace`]: CommittedCache::replace
#[derive(Debug, Default)]
pub struct CommittedCache {
    inner: RwLock<Snapshot>,
}

impl CommittedCache {
    /// Initialize empty: height 0, no contracts.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u64 {
        self.inner.read().height()
    }

    /// Fork a working snapshot: deep copies of state and validity, shared
    /// execution metadata.
    pub fn fork(&self) -> Snapshot {
        self.inner.read().clone()
    }

    /// Full clone of the committed snapshot (export capture).
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().clone()
    }

    /// Read one contract from the committed snapshot.
    pub fn read(&self, id: &ContractId) -> Option<ContractEntry> {
        self.inner.read().get(id).cloned()
    }

    /// Serve a read at `height` from the committed snapshot, or `None` when
    /// the snapshot is not far enough along or the contract is untracked.
    ///
    /// Height check and lookup happen under one lock acquisition so a
    /// concurrent commit cannot split them.
    pub fn serve(&self, id: &ContractId, height: u64) -> Option<ContractEntry> {
        let snapshot = self.inner.read();
        if height <= snapshot.height() {
            snapshot.get(id).cloned()
        } else {
            None
        }
    }

    /// Atomically replace the committed snapshot with a finished working
    /// snapshot.
    pub fn commit(&self, working: Snapshot) {
        let mut snapshot = self.inner.write();
        debug_assert!(working.height() >= snapshot.height());
        *snapshot = working;
    }

    /// Replace the committed snapshot wholesale (import path). Unlike
    /// `commit` this may move the height in either direction.
    pub fn replace(&self, snapshot: Snapshot) {
        *self.inner.write() = snapshot;
    }
}
