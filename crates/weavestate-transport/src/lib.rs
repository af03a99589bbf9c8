//! Gateway transport layer for weavestate.
//!
//! This crate provides:
//! - [`LedgerQueryService`]: the async boundary the replay pipeline fetches
//!   log entries and the network head height through
//! - [`GatewayClient`]: the concrete implementation against an Arweave-style
//!   GraphQL gateway, with cursor pagination

pub mod gateway;
pub mod service;

pub use gateway::GatewayClient;
pub use service::{EntryPage, EntryQuery, GatewayEntry, LedgerQueryService, MAX_PAGE_SIZE};
