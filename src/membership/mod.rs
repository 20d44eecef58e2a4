//! Node Pool Membership Module
//!
//! The master-side view of every cache node it controls.
//!
//! ## Core Mechanisms
//! - **Node Proxy**: `NodeProxy` records a node's port, believed status, believed data version
//!   and process identity, and carries the HTTP client used to drive it.
//! - **Status State Machine**: `NodeStatus` is a closed set of states with explicit transition
//!   rules (`New`, `Zombie`, `Active`, `Recovered`, `Unrecoverable`, `Shutdown`).
//! - **Remote Control**: health probes, version queries, snapshot pulls, stale-data
//!   notifications and shutdown requests against the node's HTTP control surface.
//! - **Process Supervision**: `NodeLauncher` spawns node processes detached from the master's
//!   session so the pool outlives a master crash.

pub mod error;
pub mod process;
pub mod proxy;
pub mod types;

#[cfg(test)]
mod tests;
