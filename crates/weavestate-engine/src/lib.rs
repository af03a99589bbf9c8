//! Deterministic ordering, log fetching and snapshot replay.
//!
//! The pipeline, leaves first:
//! - [`order`]: total-order sort keys and the replay queue
//! - [`fetch`]: chunked, paginated log fetching over the gateway boundary
//! - `replay` / `resolve`: draining the ordered queue against a working
//!   snapshot, including nested cross-contract reads issued mid-execution
//! - [`reader`]: the public entry point (cache-or-replay decision,
//!   single-writer cycles, export/import)
//!
//! External technology (ledger gateway, contract loading/compilation,
//! sandboxed execution) stays behind the traits in [`services`].

pub mod fetch;
pub mod order;
pub mod reader;
mod replay;
mod resolve;
pub mod services;

pub use fetch::{LogFetcher, CONTRACTS_PER_QUERY, GENESIS_HEIGHT};
pub use order::{order_batch, sort_key, ReplayQueue, SortKey};
pub use reader::{Reader, StateWithValidity, ALWAYS_LATEST};
pub use services::{
    ContractLoader, ExecutionEngine, ExecutionResult, Interaction, InteractionHost, LoadedContract,
    NestedRead, ReplayServices,
};
