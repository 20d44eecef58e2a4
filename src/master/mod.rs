//! Master Module
//!
//! The single coordinating process of the cache. It owns the authoritative dataset and the
//! pool of replica nodes, and runs every lifecycle policy.
//!
//! ## Responsibilities
//! - **Recovery**: On startup, adopts nodes a previous master left running and takes over
//!   the freshest dataset among them.
//! - **Replication**: Each mutation stamps a wall-clock version, publishes a snapshot and
//!   notifies every node, which then pulls the snapshot (push-notify / pull-fetch).
//! - **Scaling**: Grows the pool by launching processes, shrinks it by stopping the oldest
//!   node, always within the configured `[min, max]` bounds.
//!
//! ## Submodules
//! - **`master`**: The `Master` object and its state.
//! - **`handlers`**: The axum HTTP surface (data API, infra API, replication endpoint).

pub mod handlers;
pub mod master;
