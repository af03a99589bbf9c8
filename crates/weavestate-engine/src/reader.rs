//! The public read entry point.
//!
//! Decides per request whether the committed snapshot can answer directly
//! or a replay cycle is needed, and enforces the single-writer discipline:
//! at most one cycle mutates the cache-writing path at a time, and requests
//! arriving mid-cycle wait for it and then collapse onto the just-committed
//! result instead of running a redundant fetch of their own.

use std::collections::HashMap;
use std::slice;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use weavestate_cache::{CacheBlob, CommittedCache, ContractEntry, Snapshot};
use weavestate_transport::LedgerQueryService;
use weavestate_types::{ContractId, ExecutionMetadata, SourceKind, ValidityLog};

use crate::fetch::{LogFetcher, GENESIS_HEIGHT};
use crate::replay::CycleCtx;
use crate::services::{ContractLoader, ExecutionEngine, ReplayServices};

/// Distinguished height meaning "whatever the head is right now": always
/// forces a full replay cycle instead of serving a possibly-stale cache hit.
pub const ALWAYS_LATEST: u64 = u64::MAX;

/// A read result including the contract's validity log.
#[derive(Debug, Clone)]
pub struct StateWithValidity {
    pub state: Value,
    pub validity: ValidityLog,
}

/// State owned by the in-flight cycle: per-source metadata shared across
/// contract ids and across cycles.
#[derive(Default)]
struct CycleState {
    sources: HashMap<String, Arc<ExecutionMetadata>>,
}

/// Computes and caches contract state from the replicated log.
///
/// The committed snapshot is read-shared between requests; replay cycles are
/// serialized through an async mutex so a failed cycle can never corrupt the
/// cache and two cycles can never split-read one queue.
pub struct Reader {
    services: ReplayServices,
    committed: CommittedCache,
    cycle: Mutex<CycleState>,
}

impl Reader {
    pub fn new(
        ledger: Arc<dyn LedgerQueryService>,
        loader: Arc<dyn ContractLoader>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            services: ReplayServices {
                ledger,
                loader,
                engine,
            },
            committed: CommittedCache::new(),
            cycle: Mutex::new(CycleState::default()),
        }
    }

    /// Read a contract's state as of `height` (default: current log head).
    pub async fn read_state(&self, id: &ContractId, height: Option<u64>) -> Result<Value> {
        Ok(self.read(id, height).await?.state)
    }

    /// Read a contract's state and validity log as of `height`.
    pub async fn read_state_with_validity(
        &self,
        id: &ContractId,
        height: Option<u64>,
    ) -> Result<StateWithValidity> {
        self.read(id, height).await
    }

    /// Height of the committed snapshot. Non-decreasing across reads.
    pub fn committed_height(&self) -> u64 {
        self.committed.height()
    }

    async fn read(&self, id: &ContractId, height: Option<u64>) -> Result<StateWithValidity> {
        let force = height == Some(ALWAYS_LATEST);
        let mut target = match height {
            None | Some(ALWAYS_LATEST) => self.services.ledger.head_height().await?,
            Some(h) => h,
        };

        // The cache never rewinds: clamp backwards requests up to the
        // committed height.
        let committed_height = self.committed.height();
        if target < committed_height {
            warn!(
                requested = target,
                committed = committed_height,
                "requested height below committed snapshot; clamping"
            );
            target = committed_height;
        }

        if !force {
            if let Some(hit) = self.committed.serve(id, target) {
                debug!(contract = %id, height = target, "read served from committed snapshot");
                return Ok(to_result(hit));
            }
        }

        // Single-writer: one replay cycle at a time. Whoever was ahead of us
        // may already have committed what we need, so re-check before
        // fetching anything.
        let mut cycle = self.cycle.lock().await;
        if !force {
            if let Some(hit) = self.committed.serve(id, target) {
                debug!(contract = %id, height = target, "read served from snapshot committed while waiting");
                return Ok(to_result(hit));
            }
        }

        let mut working = self.committed.fork();
        let base_height = working.height();
        let existing = working.contract_ids();

        {
            let mut ctx = CycleCtx::new(&self.services, &mut cycle.sources, &mut working, target);
            let fetcher = LogFetcher::new(Arc::clone(&ctx.services.ledger));

            if !ctx.snapshot.contains(id) {
                let kind = ctx.track(id).await?;
                // A plain newcomer needs its whole backlog; a recursive one
                // joins from the snapshot's height forward, like any nested
                // discovery.
                let min = match kind {
                    SourceKind::Plain => None,
                    SourceKind::Recursive => Some(base_height.max(GENESIS_HEIGHT)),
                };
                let batch = fetcher.fetch(slice::from_ref(id), min, target).await?;
                ctx.queue.merge(batch)?;
            }

            if !existing.is_empty() {
                let batch = fetcher
                    .fetch(&existing, Some(base_height + 1), target)
                    .await?;
                ctx.queue.merge(batch)?;
            }

            debug!(
                contract = %id,
                target,
                queued = ctx.queue.len(),
                "starting replay cycle"
            );
            ctx.drain().await?;
        }

        working.advance_height(target);
        self.committed.commit(working);

        let entry = self
            .committed
            .read(id)
            .ok_or_else(|| anyhow!("contract {} missing after replay", id))?;
        Ok(to_result(entry))
    }

    // ==================== Cache serialization ====================

    /// Export the committed snapshot, optionally restricted to `subset`.
    /// Compiled handlers are omitted; only source ids, state and validity
    /// are persisted.
    pub fn export_cache(&self, subset: Option<&[ContractId]>) -> CacheBlob {
        CacheBlob::capture(&self.committed.snapshot(), subset)
    }

    /// Export only contracts with recursively-classified sources, the
    /// expensive-to-replay ones worth warm-starting.
    pub fn export_recursive_cache(&self) -> CacheBlob {
        CacheBlob::capture_recursive(&self.committed.snapshot())
    }

    /// Replace the committed cache wholesale from a blob.
    ///
    /// Every distinct source id is recompiled through the contract loader
    /// before the new snapshot becomes visible; a partially-imported cache
    /// is never served.
    pub async fn import_cache(&self, blob: CacheBlob) -> Result<()> {
        let mut cycle = self.cycle.lock().await;

        let mut sources: HashMap<String, Arc<ExecutionMetadata>> = HashMap::new();
        let mut contracts = HashMap::new();
        for (id, exported) in blob.contracts {
            let metadata = match sources.get(&exported.source_id) {
                Some(shared) => Arc::clone(shared),
                None => {
                    let loaded = self
                        .services
                        .loader
                        .load(&id, Some(&exported.source_id))
                        .await
                        .map_err(|e| anyhow!("contract {} not found during import: {}", id, e))?;
                    let metadata = Arc::new(ExecutionMetadata {
                        source_id: exported.source_id.clone(),
                        owner: exported.owner.clone(),
                        kind: exported.kind,
                        handler: loaded.handler,
                    });
                    sources.insert(exported.source_id.clone(), Arc::clone(&metadata));
                    metadata
                }
            };
            contracts.insert(
                id,
                ContractEntry {
                    metadata,
                    state: exported.state,
                    validity: exported.validity,
                },
            );
        }

        self.committed
            .replace(Snapshot::with_height(blob.height, contracts));
        cycle.sources = sources;
        debug!(height = blob.height, "imported cache blob");
        Ok(())
    }
}

fn to_result(entry: ContractEntry) -> StateWithValidity {
    StateWithValidity {
        state: entry.state,
        validity: entry.validity,
    }
}
