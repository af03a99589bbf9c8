//! Nested cross-contract reads during replay.
//!
//! A handler may read another contract's state mid-execution. Contracts
//! already in the working snapshot answer immediately from a deep clone.
//! Unknown contracts are loaded and classified once per source:
//!
//! - a *plain* source has no nested reads of its own, so its history can be
//!   resolved to completion eagerly, inline, without touching the shared
//!   queue;
//! - a *recursive* source may depend on entries still pending for contracts
//!   mid-replay, so it joins the single height-ordered queue like any other
//!   tracked contract and stays at its initial state until those entries
//!   drain.

use std::slice;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use weavestate_cache::ContractEntry;
use weavestate_types::{ContractId, ExecutionMetadata, LogEntry, SourceKind};

use crate::fetch::{LogFetcher, GENESIS_HEIGHT};
use crate::order::order_batch;
use crate::replay::{parse_input, CycleCtx};
use crate::services::{Interaction, InteractionHost, NestedRead};

#[async_trait]
impl InteractionHost for CycleCtx<'_> {
    fn replay_height(&self) -> u64 {
        self.snapshot.height()
    }

    async fn read_contract_state(
        &mut self,
        target: &ContractId,
        height: Option<u64>,
        want_validity: bool,
    ) -> Result<NestedRead> {
        let inflight = self.snapshot.height();
        if let Some(requested) = height {
            if requested != inflight {
                bail!(
                    "nested read height {} does not match in-flight replay height {}",
                    requested,
                    inflight
                );
            }
        }

        if !self.snapshot.contains(target) {
            if !self.resolving.insert(target.clone()) {
                bail!("cyclic nested resolution of contract {}", target);
            }
            let outcome = self.materialize(target).await;
            self.resolving.remove(target);
            outcome?;
        }

        let tracked = self
            .snapshot
            .get(target)
            .ok_or_else(|| anyhow!("contract {} missing after nested resolution", target))?;
        Ok(NestedRead {
            state: tracked.state.clone(),
            validity: want_validity.then(|| tracked.validity.clone()),
        })
    }
}

impl CycleCtx<'_> {
    /// Load a contract and return its shared metadata plus initial state,
    /// reusing the per-source metadata instance when the source is already
    /// known.
    pub(crate) async fn load_metadata(
        &mut self,
        id: &ContractId,
    ) -> Result<(Arc<ExecutionMetadata>, Value)> {
        let loaded = self
            .services
            .loader
            .load(id, None)
            .await
            .map_err(|e| anyhow!("contract {} not found: {}", id, e))?;

        let metadata = match self.sources.get(&loaded.source_id) {
            Some(shared) => Arc::clone(shared),
            None => {
                let kind = self.services.engine.classify(&loaded.handler);
                debug!(contract = %id, source = %loaded.source_id, ?kind, "classified contract source");
                let metadata = Arc::new(ExecutionMetadata {
                    source_id: loaded.source_id.clone(),
                    owner: loaded.owner,
                    kind,
                    handler: loaded.handler,
                });
                self.sources
                    .insert(loaded.source_id, Arc::clone(&metadata));
                metadata
            }
        };

        Ok((metadata, loaded.init_state))
    }

    /// Start tracking a contract at its initial state.
    pub(crate) async fn track(&mut self, id: &ContractId) -> Result<SourceKind> {
        let (metadata, init_state) = self.load_metadata(id).await?;
        let kind = metadata.kind;
        self.snapshot
            .insert(id.clone(), ContractEntry::new(metadata, init_state));
        Ok(kind)
    }

    /// Bring a contract discovered mid-replay into the working snapshot.
    async fn materialize(&mut self, id: &ContractId) -> Result<()> {
        let kind = self.track(id).await?;
        let fetcher = LogFetcher::new(Arc::clone(&self.services.ledger));

        match kind {
            SourceKind::Recursive => {
                // Deferred: its entries join the shared queue and replay in
                // canonical order as the queue drains.
                let min = self.snapshot.height().max(GENESIS_HEIGHT);
                let batch = fetcher
                    .fetch(slice::from_ref(id), Some(min), self.target_height)
                    .await?;
                self.queue.merge(batch)?;
            }
            SourceKind::Plain => {
                // Eager: replay its full history up to the in-flight height
                // right now; anything past that height still belongs to the
                // shared queue so the committed snapshot stays consistent.
                let batch = fetcher
                    .fetch(slice::from_ref(id), None, self.target_height)
                    .await?;
                let ordered = order_batch(batch)?;
                let inflight = self.snapshot.height();
                let mut deferred = Vec::new();
                for entry in ordered {
                    if entry.block.height <= inflight {
                        self.apply_inline(id, entry).await?;
                    } else {
                        deferred.push(entry);
                    }
                }
                self.queue.merge(deferred)?;
            }
        }
        Ok(())
    }

    /// Replay one entry of a plain contract inline, outside the shared
    /// queue. The snapshot height is not advanced: inline entries are at or
    /// below the in-flight height by construction.
    async fn apply_inline(&mut self, id: &ContractId, entry: LogEntry) -> Result<()> {
        let Some((cid, raw_input)) = entry.interaction_for(|candidate| candidate == id) else {
            return Ok(());
        };
        let Some(input) = parse_input(raw_input) else {
            return Ok(());
        };

        let (handler, state) = {
            let tracked = self
                .snapshot
                .get(&cid)
                .ok_or_else(|| anyhow!("contract {} vanished from working snapshot", cid))?;
            (tracked.metadata.handler.clone(), tracked.state.clone())
        };

        let interaction = Interaction {
            input,
            caller: entry.owner_address.clone(),
        };

        let mut sealed = SealedHost {
            height: self.snapshot.height(),
        };
        let result = self
            .services
            .engine
            .execute(&handler, interaction, state, &mut sealed)
            .await?;

        let tracked = self
            .snapshot
            .get_mut(&cid)
            .ok_or_else(|| anyhow!("contract {} vanished from working snapshot", cid))?;
        tracked.validity.record(entry.id.as_str(), result.accepted);
        if result.accepted {
            tracked.state = result.state;
        }
        Ok(())
    }
}

/// Host for inline replay of plain contracts. A plain source has no nested
/// reads by classification, so any attempt is a contract violation.
struct SealedHost {
    height: u64,
}

#[async_trait]
impl InteractionHost for SealedHost {
    fn replay_height(&self) -> u64 {
        self.height
    }

    async fn read_contract_state(
        &mut self,
        target: &ContractId,
        _height: Option<u64>,
        _want_validity: bool,
    ) -> Result<NestedRead> {
        bail!(
            "contract classified as plain attempted a nested read of {}",
            target
        )
    }
}
