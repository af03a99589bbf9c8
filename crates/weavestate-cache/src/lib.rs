//! Committed snapshot store and cache serialization for weavestate.
//!
//! This crate provides:
//! - [`Snapshot`] / [`ContractEntry`]: per-contract state pinned to a log
//!   height, with copy-on-write cloning for replay cycles
//! - [`CommittedCache`]: the process-wide committed snapshot behind a
//!   read-shared lock, mutated only by atomic commit or wholesale import
//! - [`CacheBlob`]: the transportable export form (metadata without compiled
//!   handlers), with subsetting by contract id or recursive classification

pub mod blob;
pub mod snapshot;

pub use blob::{BlobContract, CacheBlob};
pub use snapshot::{CommittedCache, ContractEntry, Snapshot};
