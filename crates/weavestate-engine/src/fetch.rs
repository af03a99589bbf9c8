//! Chunked, paginated log fetching.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use weavestate_transport::{EntryQuery, GatewayEntry, LedgerQueryService, MAX_PAGE_SIZE};
use weavestate_types::{ContractId, LogEntry};

/// Query breadth limit: contract ids per gateway query.
pub const CONTRACTS_PER_QUERY: usize = 10;

/// Lowest queryable height. Height 0 means "before any block" and is
/// excluded so unconfirmed entries can never match.
pub const GENESIS_HEIGHT: u64 = 1;

/// Fetches the unprocessed log segment for a set of contracts.
pub struct LogFetcher {
    ledger: Arc<dyn LedgerQueryService>,
    page_size: usize,
}

impl LogFetcher {
    pub fn new(ledger: Arc<dyn LedgerQueryService>) -> Self {
        Self {
            ledger,
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Fetch all primary-log interactions for `contracts` with block heights
    /// in `[min_height, max_height]`. `min_height = None` means from
    /// genesis.
    ///
    /// Entries bundled under a parent are dropped; an entry without a
    /// confirmed block fails the whole fetch, since its height is part of
    /// the invariant that backs cache correctness.
    pub async fn fetch(
        &self,
        contracts: &[ContractId],
        min_height: Option<u64>,
        max_height: u64,
    ) -> Result<Vec<LogEntry>> {
        let min_height = min_height.unwrap_or(GENESIS_HEIGHT).max(GENESIS_HEIGHT);
        if min_height > max_height || contracts.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for chunk in contracts.chunks(CONTRACTS_PER_QUERY) {
            let query = EntryQuery {
                contracts: chunk.to_vec(),
                min_height,
                max_height,
                page_size: self.page_size,
            };

            let mut cursor: Option<String> = None;
            let mut pages = 0usize;
            loop {
                let page = self.ledger.query_entries(&query, cursor.as_deref()).await?;
                pages += 1;
                for raw in page.entries {
                    if raw.parent_id.is_some() {
                        continue;
                    }
                    entries.push(confirmed(raw)?);
                }
                if !page.has_next_page {
                    break;
                }
                match page.end_cursor {
                    Some(next) => cursor = Some(next),
                    None => bail!("gateway reported another page without a cursor"),
                }
            }

            debug!(
                contracts = chunk.len(),
                pages,
                min_height,
                max_height,
                "fetched log segment chunk"
            );
        }

        Ok(entries)
    }
}

/// Require a confirmed block on a gateway entry.
fn confirmed(raw: GatewayEntry) -> Result<LogEntry> {
    let Some(block) = raw.block else {
        bail!("entry {} is not yet confirmed into a block", raw.id);
    };
    Ok(LogEntry {
        id: raw.id,
        owner_address: raw.owner_address,
        tags: raw.tags,
        block,
        parent_id: raw.parent_id,
    })
}
