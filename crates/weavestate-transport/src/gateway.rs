//! GraphQL client for Arweave-style ledger gateways.
//!
//! ## Endpoints
//! - Default: `https://arweave.net`
//!
//! ## Pagination
//!
//! Gateways cap pages at [`MAX_PAGE_SIZE`] entries and hand back a cursor per
//! edge; callers resume with the cursor of the last edge until
//! `hasNextPage` turns false. The fetch layer drives that loop.
//!
//! ## Usage
//!
//! ```ignore
//! let client = GatewayClient::mainnet();
//! let page = client.query_page(&query, None)?;
//! let head = client.network_height()?;
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use weavestate_types::env_utils::env_var_or;
use weavestate_types::{BlockRef, Tag};

use crate::service::{marker_tags, EntryPage, EntryQuery, GatewayEntry, LedgerQueryService};

/// Default gateway endpoint (overridable via `WEAVESTATE_GATEWAY_URL`).
const DEFAULT_GATEWAY: &str = "https://arweave.net";

/// GraphQL client for ledger gateway queries.
#[derive(Clone)]
pub struct GatewayClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl GatewayClient {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 60;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn default_timeouts() -> (Duration, Duration) {
        let timeout_secs = env_var_or("WEAVESTATE_GATEWAY_TIMEOUT_SECS", Self::DEFAULT_TIMEOUT_SECS);
        let connect_secs = env_var_or(
            "WEAVESTATE_GATEWAY_CONNECT_TIMEOUT_SECS",
            Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        );
        (
            Duration::from_secs(timeout_secs),
            Duration::from_secs(connect_secs),
        )
    }

    /// Create a client for the default public gateway.
    pub fn mainnet() -> Self {
        let endpoint = std::env::var("WEAVESTATE_GATEWAY_URL")
            .unwrap_or_else(|_| DEFAULT_GATEWAY.to_string());
        Self::new(&endpoint)
    }

    /// Create a client with a custom endpoint.
    pub fn new(endpoint: &str) -> Self {
        let (timeout, connect_timeout) = Self::default_timeouts();
        Self::with_timeouts(endpoint, timeout, connect_timeout)
    }

    /// Create a client with explicit timeouts.
    pub fn with_timeouts(endpoint: &str, timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .timeout_connect(connect_timeout)
                .build(),
        }
    }

    /// Execute a GraphQL query against the gateway.
    fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        let response: Value = self
            .agent
            .post(&format!("{}/graphql", self.endpoint))
            .set("Content-Type", "application/json")
            .send_json(&body)
            .map_err(|e| anyhow!("gateway request failed: {}", e))?
            .into_json()
            .map_err(|e| anyhow!("failed to parse gateway response: {}", e))?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let msg = errors[0]
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                return Err(anyhow!("gateway error: {}", msg));
            }
        }

        response
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow!("no data in gateway response"))
    }

    /// Fetch one page of interaction entries.
    pub fn query_page(&self, query: &EntryQuery, cursor: Option<&str>) -> Result<EntryPage> {
        const ENTRY_QUERY: &str = r#"
            query Interactions($tags: [TagFilter!]!, $block: BlockFilter!, $first: Int!, $after: String) {
                transactions(tags: $tags, block: $block, first: $first, sort: HEIGHT_ASC, after: $after) {
                    pageInfo {
                        hasNextPage
                    }
                    edges {
                        cursor
                        node {
                            id
                            owner { address }
                            tags {
                                name
                                value
                            }
                            block {
                                height
                                id
                                timestamp
                            }
                            parent { id }
                        }
                    }
                }
            }
        "#;

        let tags: Vec<Value> = marker_tags(&query.contracts)
            .into_iter()
            .map(|(name, values)| serde_json::json!({ "name": name, "values": values }))
            .collect();

        let variables = serde_json::json!({
            "tags": tags,
            "block": { "min": query.min_height, "max": query.max_height },
            "first": query.page_size,
            "after": cursor,
        });

        let data = self.graphql(ENTRY_QUERY, variables)?;
        let transactions = data
            .get("transactions")
            .ok_or_else(|| anyhow!("no transactions in gateway response"))?;

        let has_next_page = transactions
            .get("pageInfo")
            .and_then(|p| p.get("hasNextPage"))
            .and_then(|h| h.as_bool())
            .unwrap_or(false);

        let edges = transactions
            .get("edges")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();

        let end_cursor = edges
            .last()
            .and_then(|e| e.get("cursor"))
            .and_then(|c| c.as_str())
            .map(String::from);

        let entries = edges
            .iter()
            .filter_map(|edge| edge.get("node"))
            .map(parse_entry)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            entries = entries.len(),
            has_next_page, "fetched gateway page"
        );

        Ok(EntryPage {
            entries,
            has_next_page,
            end_cursor,
        })
    }

    /// Fetch the current network head height from the gateway's info
    /// endpoint.
    pub fn network_height(&self) -> Result<u64> {
        let info: Value = self
            .agent
            .get(&format!("{}/info", self.endpoint))
            .call()
            .map_err(|e| anyhow!("gateway info request failed: {}", e))?
            .into_json()
            .map_err(|e| anyhow!("failed to parse gateway info: {}", e))?;

        info.get("height")
            .and_then(|h| h.as_u64())
            .ok_or_else(|| anyhow!("no height in gateway info response"))
    }
}

fn parse_entry(node: &Value) -> Result<GatewayEntry> {
    let id = node
        .get("id")
        .and_then(|i| i.as_str())
        .ok_or_else(|| anyhow!("gateway entry missing id"))?
        .to_string();

    let owner_address = node
        .get("owner")
        .and_then(|o| o.get("address"))
        .and_then(|a| a.as_str())
        .unwrap_or("")
        .to_string();

    let tags = node
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .map(|t| {
                    Tag::new(
                        t.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                        t.get("value").and_then(|v| v.as_str()).unwrap_or(""),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let block = match node.get("block") {
        Some(b) if !b.is_null() => Some(BlockRef {
            height: b
                .get("height")
                .and_then(|h| h.as_u64())
                .ok_or_else(|| anyhow!("gateway entry {} has a block without a height", id))?,
            id: b
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or("")
                .to_string(),
            timestamp: b.get("timestamp").and_then(|t| t.as_u64()).unwrap_or(0),
        }),
        _ => None,
    };

    let parent_id = node
        .get("parent")
        .and_then(|p| p.get("id"))
        .and_then(|i| i.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    Ok(GatewayEntry {
        id,
        owner_address,
        tags,
        block,
        parent_id,
    })
}

#[async_trait]
impl LedgerQueryService for GatewayClient {
    async fn query_entries(&self, query: &EntryQuery, cursor: Option<&str>) -> Result<EntryPage> {
        let client = self.clone();
        let query = query.clone();
        let cursor = cursor.map(String::from);
        tokio::task::spawn_blocking(move || client.query_page(&query, cursor.as_deref()))
            .await
            .map_err(|e| anyhow!("gateway query task failed: {}", e))?
    }

    async fn head_height(&self) -> Result<u64> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.network_height())
            .await
            .map_err(|e| anyhow!("gateway info task failed: {}", e))?
    }
}
