//! Replaying the ordered queue against a working snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;

use weavestate_cache::Snapshot;
use weavestate_types::{ContractId, ExecutionMetadata, LogEntry};

use crate::order::ReplayQueue;
use crate::services::{Interaction, ReplayServices};

/// One in-flight replay cycle over a working snapshot.
///
/// Owns the ordered queue and exclusively borrows the working snapshot for
/// the cycle's duration; the committed cache is untouched until the reader
/// commits the finished snapshot. The cycle doubles as the nested-read host
/// handed to the execution engine (see `resolve`).
pub(crate) struct CycleCtx<'a> {
    pub(crate) services: &'a ReplayServices,
    /// Metadata shared per distinct source id, surviving across cycles.
    pub(crate) sources: &'a mut HashMap<String, Arc<ExecutionMetadata>>,
    pub(crate) snapshot: &'a mut Snapshot,
    pub(crate) queue: ReplayQueue,
    /// Height the cycle is replaying towards.
    pub(crate) target_height: u64,
    /// Contracts currently being materialized by a nested read; re-entering
    /// one is a cyclic resolution and a hard error.
    pub(crate) resolving: HashSet<ContractId>,
}

impl<'a> CycleCtx<'a> {
    pub(crate) fn new(
        services: &'a ReplayServices,
        sources: &'a mut HashMap<String, Arc<ExecutionMetadata>>,
        snapshot: &'a mut Snapshot,
        target_height: u64,
    ) -> Self {
        Self {
            services,
            sources,
            snapshot,
            queue: ReplayQueue::new(),
            target_height,
            resolving: HashSet::new(),
        }
    }

    /// Drain the queue to empty, including entries merged in mid-replay by
    /// nested resolution.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        while let Some(entry) = self.queue.pop_front() {
            self.apply(entry).await?;
        }
        Ok(())
    }

    /// Replay one entry against the working snapshot.
    async fn apply(&mut self, entry: LogEntry) -> Result<()> {
        // Not an interaction with any tracked contract: skip silently.
        let Some((cid, raw_input)) = entry.interaction_for(|id| self.snapshot.contains(id)) else {
            return Ok(());
        };
        // Malformed or empty input: skip silently, no validity record.
        let Some(input) = parse_input(raw_input) else {
            return Ok(());
        };

        // Height advances even when the interaction is later found invalid.
        self.snapshot.advance_height(entry.block.height);

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

        let engine = Arc::clone(&self.services.engine);
        let result = engine.execute(&handler, interaction, state, self).await?;

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

/// Parse an `Input` tag value. `None` means the entry is silently skipped:
/// unparsable JSON, JSON `null`, or an empty string value.
pub(crate) fn parse_input(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => None,
        Ok(Value::String(s)) if s.is_empty() => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}
