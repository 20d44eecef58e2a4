//! Distributed In-Memory Cache Library
//!
//! A master process owns the authoritative key-value dataset and supervises a pool of replica
//! node processes reachable over loopback HTTP. The binaries (`cache-master`, `cache-node`)
//! are thin wrappers around the modules below.
//!
//! ## Architecture Modules
//! - **`config`**: YAML configuration model with defaults and validation.
//! - **`master`**: Authoritative data, version stamping, broadcast/refresh, startup recovery
//!   and elastic scaling, plus the master's HTTP surface.
//! - **`membership`**: The master-side proxy of each node: status state machine, remote
//!   control RPCs and detached process launching.
//! - **`node`**: The replica process: local copy of the dataset, control endpoints and the
//!   bounded graceful shutdown.
//! - **`storage`**: Versioned map, wire payload and endpoint constants shared by both sides.

pub mod config;
pub mod master;
pub mod membership;
pub mod node;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
