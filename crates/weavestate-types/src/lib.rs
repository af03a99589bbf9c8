//! Shared types for the weavestate workspace.
//!
//! This crate provides the foundational types used across the workspace,
//! breaking circular dependency chains:
//! - [`ContractId`] - validated ledger transaction id of a contract
//! - [`LogEntry`] / [`Tag`] / [`BlockRef`] - confirmed interaction records
//! - [`ExecutionMetadata`] / [`Handler`] / [`SourceKind`] - per-source
//!   execution info shared across contract ids
//! - [`ValidityLog`] - insertion-ordered accepted/rejected record per contract

pub mod entry;
pub mod env_utils;
pub mod id;
pub mod meta;
pub mod validity;

pub use entry::{BlockRef, LogEntry, Tag, APP_NAME_VALUE, TAG_APP_NAME, TAG_CONTRACT, TAG_INPUT};
pub use id::ContractId;
pub use meta::{ExecutionMetadata, Handler, SourceKind};
pub use validity::{ValidityLog, ValidityRecord};
