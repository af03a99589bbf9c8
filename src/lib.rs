//! weavestate: an incremental snapshot/replay cache for SmartWeave-style
//! log-replicated contracts.
//!
//! A contract's state is the fold of its ordered interaction log over an
//! initial state. [`Reader`] answers "state of contract C as of height H"
//! by reusing a committed snapshot and replaying only the log segment not
//! yet folded, with deterministic total ordering, nested cross-contract
//! reads during replay, and copy-on-write failure atomicity.
//!
//! ```ignore
//! use std::sync::Arc;
//! use weavestate::{GatewayClient, Reader};
//!
//! # async fn run(loader: Arc<dyn weavestate::ContractLoader>,
//! #              engine: Arc<dyn weavestate::ExecutionEngine>) -> anyhow::Result<()> {
//! let reader = Reader::new(Arc::new(GatewayClient::mainnet()), loader, engine);
//! let id = "b8y_FD82vSaE1skZtqPqtz9q6xiuZnqRcCm9mV90SuY".parse()?;
//! let state = reader.read_state(&id, None).await?;
//! # Ok(())
//! # }
//! ```

pub use weavestate_cache::{BlobContract, CacheBlob, CommittedCache, ContractEntry, Snapshot};
pub use weavestate_engine::{
    order_batch, sort_key, ContractLoader, ExecutionEngine, ExecutionResult, Interaction,
    InteractionHost, LoadedContract, LogFetcher, NestedRead, Reader, ReplayQueue, SortKey,
    StateWithValidity, ALWAYS_LATEST,
};
pub use weavestate_transport::{
    EntryPage, EntryQuery, GatewayClient, GatewayEntry, LedgerQueryService,
};
pub use weavestate_types::{
    BlockRef, ContractId, ExecutionMetadata, Handler, LogEntry, SourceKind, Tag, ValidityLog,
};
