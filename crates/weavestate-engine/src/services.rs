//! External service boundaries.
//!
//! Everything that suspends lives behind these traits: ledger queries,
//! contract loading/compilation, and interaction execution. The replay core
//! never assumes a particular execution technology: an embedded
//! interpreter, a subprocess sandbox and a plugin ABI all fit behind
//! [`ExecutionEngine`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use weavestate_transport::LedgerQueryService;
use weavestate_types::{ContractId, Handler, SourceKind, ValidityLog};

/// One interaction as handed to the execution engine.
#[derive(Debug, Clone)]
pub struct Interaction {
    /// Parsed JSON from the entry's `Input` tag.
    pub input: Value,
    /// Address that signed the entry.
    pub caller: String,
}

/// Outcome of executing one interaction.
///
/// Engines resolve their internal execution faults to `accepted: false`
/// themselves; an `Err` from [`ExecutionEngine::execute`] is a hard failure
/// that aborts the whole replay cycle.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub accepted: bool,
    /// The state after the interaction. Unchanged input state on rejection.
    pub state: Value,
}

/// A loaded contract: compiled handler plus initial state.
#[derive(Debug, Clone)]
pub struct LoadedContract {
    pub source_id: String,
    pub owner: String,
    pub handler: Handler,
    pub init_state: Value,
}

/// Result of a nested cross-contract read.
#[derive(Debug, Clone)]
pub struct NestedRead {
    pub state: Value,
    pub validity: Option<ValidityLog>,
}

/// Loads a contract's metadata and initial state, compiling its source into
/// a callable handler exactly once per distinct source id.
#[async_trait]
pub trait ContractLoader: Send + Sync {
    /// Load `id`, optionally forcing a specific source (used on cache import
    /// to recompile from a persisted source id).
    async fn load(&self, id: &ContractId, source_override: Option<&str>) -> Result<LoadedContract>;
}

/// Host interface handed to the execution engine for the duration of one
/// interaction. Nested reads route back into the in-flight replay cycle.
#[async_trait]
pub trait InteractionHost: Send {
    /// Block height of the in-flight replay.
    fn replay_height(&self) -> u64;

    /// Read another contract's state as of the in-flight height.
    ///
    /// `height` defaults to [`replay_height`]; requesting any other height
    /// is a hard error. Nested reads observe one consistent cut of the
    /// world, never a different point in time than the outer replay.
    ///
    /// [`replay_height`]: InteractionHost::replay_height
    async fn read_contract_state(
        &mut self,
        target: &ContractId,
        height: Option<u64>,
        want_validity: bool,
    ) -> Result<NestedRead>;
}

/// Sandboxed execution of a single interaction against a state value.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute one interaction. May suspend on nested reads through `host`.
    async fn execute(
        &self,
        handler: &Handler,
        interaction: Interaction,
        state: Value,
        host: &mut dyn InteractionHost,
    ) -> Result<ExecutionResult>;

    /// Classify a compiled handler's source as plain or recursive. Called
    /// once per distinct source id; the classification is permanent.
    fn classify(&self, handler: &Handler) -> SourceKind;
}

/// The three external collaborators a replay cycle needs.
pub struct ReplayServices {
    pub ledger: Arc<dyn LedgerQueryService>,
    pub loader: Arc<dyn ContractLoader>,
    pub engine: Arc<dyn ExecutionEngine>,
}
