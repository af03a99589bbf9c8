//! Deterministic total ordering of log entries.
//!
//! Gateways return pages sorted by height, but page boundaries, resumed
//! cursors and mid-replay merges all scramble arrival order. The sort key
//! computed here (zero-padded height plus a digest of block id and entry
//! id) is the authoritative replay order: any two batches covering the
//! same entries merge into the same sequence regardless of how they were
//! fetched.

use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose};
use sha2::{Digest, Sha256};

use weavestate_types::LogEntry;

/// Height digits in the key. Lexicographic order matches numeric order up
/// to this magnitude.
const HEIGHT_DIGITS: usize = 12;

/// Gateway ids are unpadded base64url; tolerate padded variants and nonzero
/// trailing bits rather than rejecting an otherwise-valid entry.
const ID_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Canonical replay-order key: `{height:012},{sha256(block_id ∥ entry_id)}`.
///
/// Ties are impossible by construction since entry ids are unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(String);

impl SortKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Compute an entry's sort key. Pure: both the block id and the entry id
/// are already known, so no suspension is involved.
pub fn sort_key(entry: &LogEntry) -> Result<SortKey> {
    let block_bytes = ID_DECODER
        .decode(entry.block.id.as_bytes())
        .with_context(|| format!("entry {}: undecodable block id {:?}", entry.id, entry.block.id))?;
    let id_bytes = ID_DECODER
        .decode(entry.id.as_bytes())
        .with_context(|| format!("entry {}: undecodable entry id", entry.id))?;

    let mut hasher = Sha256::new();
    hasher.update(&block_bytes);
    hasher.update(&id_bytes);
    let digest = hex::encode(hasher.finalize());

    Ok(SortKey(format!(
        "{:0width$},{}",
        entry.block.height,
        digest,
        width = HEIGHT_DIGITS
    )))
}

/// Sort a batch of entries into canonical replay order.
pub fn order_batch(entries: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
    let mut keyed = entries
        .into_iter()
        .map(|entry| Ok((sort_key(&entry)?, entry)))
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
}

/// The ordered queue a replay cycle drains.
///
/// Merging a new batch re-sorts the remaining queue, so new entries are
/// never appended unsorted. Entry ids seen once are never enqueued again:
/// overlapping fetch ranges cannot double-replay an entry.
#[derive(Debug, Default)]
pub struct ReplayQueue {
    entries: VecDeque<(SortKey, LogEntry)>,
    seen: HashSet<String>,
}

impl ReplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch into the queue and restore canonical order.
    pub fn merge(&mut self, batch: Vec<LogEntry>) -> Result<()> {
        for entry in batch {
            if !self.seen.insert(entry.id.clone()) {
                continue;
            }
            let key = sort_key(&entry)?;
            self.entries.push_back((key, entry));
        }
        self.entries
            .make_contiguous()
            .sort_by(|a, b| a.0.cmp(&b.0));
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<LogEntry> {
        self.entries.pop_front().map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
