//! Transportable cache exports.
//!
//! A [`CacheBlob`] is the committed snapshot minus everything that cannot
//! cross a process boundary: compiled handlers are dropped and only source
//! ids survive, so an importer re-invokes its contract loader to recompile
//! before the cache becomes usable.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weavestate_types::{ContractId, SourceKind, ValidityLog};

use crate::snapshot::Snapshot;

/// One exported contract: execution metadata without the handler handle,
/// plus state and validity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobContract {
    pub source_id: String,
    pub owner: String,
    pub kind: SourceKind,
    pub state: Value,
    pub validity: ValidityLog,
}

/// Serialized form of a committed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheBlob {
    pub height: u64,
    pub contracts: BTreeMap<ContractId, BlobContract>,
}

impl CacheBlob {
    /// Capture a snapshot, optionally restricted to `subset` contract ids.
    /// Ids in `subset` that the snapshot does not track are skipped.
    pub fn capture(snapshot: &Snapshot, subset: Option<&[ContractId]>) -> Self {
        let wanted = |id: &ContractId| match subset {
            Some(ids) => ids.contains(id),
            None => true,
        };
        Self::capture_if(snapshot, wanted)
    }

    /// Capture only contracts whose source is classified recursive, the
    /// expensive-to-replay ones worth warm-starting.
    pub fn capture_recursive(snapshot: &Snapshot) -> Self {
        let recursive: Vec<ContractId> = snapshot
            .iter()
            .filter(|(_, entry)| entry.metadata.kind.is_recursive())
            .map(|(id, _)| id.clone())
            .collect();
        Self::capture_if(snapshot, |id| recursive.contains(id))
    }

    fn capture_if(snapshot: &Snapshot, wanted: impl Fn(&ContractId) -> bool) -> Self {
        let contracts = snapshot
            .iter()
            .filter(|(id, _)| wanted(id))
            .map(|(id, entry)| {
                (
                    id.clone(),
                    BlobContract {
                        source_id: entry.metadata.source_id.clone(),
                        owner: entry.metadata.owner.clone(),
                        kind: entry.metadata.kind,
                        state: entry.state.clone(),
                        validity: entry.validity.clone(),
                    },
                )
            })
            .collect();
        Self {
            height: snapshot.height(),
            contracts,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize cache blob")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse cache blob")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write cache blob to {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cache blob from {}", path.display()))?;
        Self::from_json(&json)
    }
}
