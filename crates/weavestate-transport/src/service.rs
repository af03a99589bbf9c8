//! The ledger query boundary.
//!
//! The replay pipeline only ever talks to the ledger through
//! [`LedgerQueryService`]; the gateway client implements it for real
//! networks and tests substitute in-memory fixtures.

use anyhow::Result;
use async_trait::async_trait;

use weavestate_types::{BlockRef, ContractId, Tag};

/// Maximum entries per gateway page (server limit).
pub const MAX_PAGE_SIZE: usize = 100;

/// One filtered query over the primary log: interactions for a set of
/// contracts within a closed block-height range.
#[derive(Debug, Clone)]
pub struct EntryQuery {
    pub contracts: Vec<ContractId>,
    /// Inclusive. Height 0 is reserved for "before any block" and is never
    /// queried, so callers pass at least 1.
    pub min_height: u64,
    /// Inclusive.
    pub max_height: u64,
    pub page_size: usize,
}

/// An entry as the gateway reports it.
///
/// `block` is `None` while the entry has been seen but not yet confirmed
/// into a block; the fetch layer treats that as fatal rather than replaying
/// against data with no finalized height.
#[derive(Debug, Clone)]
pub struct GatewayEntry {
    pub id: String,
    pub owner_address: String,
    pub tags: Vec<Tag>,
    pub block: Option<BlockRef>,
    pub parent_id: Option<String>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct EntryPage {
    pub entries: Vec<GatewayEntry>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Async boundary to the ledger's query service.
///
/// The service filters server-side by the protocol marker tag and the
/// requested contract ids, sorted ascending by height; the replay pipeline
/// re-sorts with its own total order regardless, so page arrival order never
/// matters.
#[async_trait]
pub trait LedgerQueryService: Send + Sync {
    /// Fetch one page of interactions matching `query`, resuming from
    /// `cursor` when given.
    async fn query_entries(&self, query: &EntryQuery, cursor: Option<&str>) -> Result<EntryPage>;

    /// Current network head height (the default read target when a caller
    /// gives no height).
    async fn head_height(&self) -> Result<u64>;
}

/// Tag filters sent with every entry query.
pub(crate) fn marker_tags(contracts: &[ContractId]) -> Vec<(String, Vec<String>)> {
    vec![
        (
            weavestate_types::TAG_APP_NAME.to_string(),
            vec![weavestate_types::APP_NAME_VALUE.to_string()],
        ),
        (
            weavestate_types::TAG_CONTRACT.to_string(),
            contracts.iter().map(|c| c.as_str().to_string()).collect(),
        ),
    ]
}
