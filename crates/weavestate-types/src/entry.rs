//! Confirmed ledger entries and their tag layout.
//!
//! An entry is an *interaction* with a contract only when its tag list
//! contains an adjacent `(Contract, Input)` pair naming a tracked contract.
//! Everything else on the log is ignored by the replay pipeline.

use serde::{Deserialize, Serialize};

use crate::id::ContractId;

/// Marker tag name identifying protocol interactions at the gateway.
pub const TAG_APP_NAME: &str = "App-Name";
/// Marker tag value identifying protocol interactions at the gateway.
pub const APP_NAME_VALUE: &str = "SmartWeaveAction";
/// Tag naming the contract an interaction targets.
pub const TAG_CONTRACT: &str = "Contract";
/// Tag carrying the JSON input of an interaction. Must directly follow the
/// `Contract` tag it belongs to.
pub const TAG_INPUT: &str = "Input";

/// A single name/value tag on a ledger entry. Order within the tag list is
/// significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reference to the block that confirmed an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    /// Block id (unpadded base64url).
    pub id: String,
    pub timestamp: u64,
}

/// One immutable record on the primary log, confirmed into a block.
///
/// Entries still waiting for a block never reach this type: the fetch layer
/// rejects them outright, since replay order is derived from block heights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Ledger transaction id (unpadded base64url).
    pub id: String,
    /// Address that signed the entry; becomes the interaction caller.
    pub owner_address: String,
    pub tags: Vec<Tag>,
    pub block: BlockRef,
    /// Set when the entry is bundled under a parent entry. Such entries are
    /// not directly on the primary log and are dropped by the fetcher.
    pub parent_id: Option<String>,
}

impl LogEntry {
    /// Locate the adjacent `(Contract, Input)` tag pair whose contract value
    /// satisfies `tracked`, returning the contract id and the raw input.
    ///
    /// Returns `None` for entries that are not interactions with any tracked
    /// contract; such entries are silently skipped during replay.
    pub fn interaction_for(
        &self,
        mut tracked: impl FnMut(&ContractId) -> bool,
    ) -> Option<(ContractId, &str)> {
        for pair in self.tags.windows(2) {
            if pair[0].name != TAG_CONTRACT || pair[1].name != TAG_INPUT {
                continue;
            }
            if let Ok(id) = ContractId::new(pair[0].value.as_str()) {
                if tracked(&id) {
                    return Some((id, pair[1].value.as_str()));
                }
            }
        }
        None
    }
}
