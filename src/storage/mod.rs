//! Replicated Storage Module
//!
//! The data layer shared by the master and every cache node.
//!
//! ## Core Concepts
//! - **Versioned map**: A plain string-to-string map stamped with a wall-clock version.
//!   Every node holds a full replica; there is no partitioning.
//! - **Wire payload**: `DataPayload` is the immutable snapshot exchanged over HTTP, both
//!   when a node pulls from the master and when the master inspects a node.
//! - **Endpoints**: All paths of the master and node HTTP surfaces are declared in `protocol`
//!   so that servers and clients agree on them.

pub mod memory;
pub mod protocol;
