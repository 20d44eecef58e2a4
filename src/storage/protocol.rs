//! Storage Network Protocol
//!
//! Defines the HTTP endpoints and the wire payload used for replication between the
//! master and its cache nodes.
//!
//! Replication is push-notify / pull-fetch: the master only tells a node that its data
//! is stale (`/notify`, no body) and the node pulls the full snapshot from
//! `ENDPOINT_REPLICATE_DATA` itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Master endpoints ---

/// Snapshot of the authoritative dataset, pulled by nodes.
pub const ENDPOINT_REPLICATE_DATA: &str = "/replicate/data";
pub const ENDPOINT_API_GET: &str = "/api/data/get";
pub const ENDPOINT_API_SET: &str = "/api/data/set";
pub const ENDPOINT_API_DELETE: &str = "/api/data/delete";
pub const ENDPOINT_INFRA_SCALE_UP: &str = "/api/infra/scaleup";
pub const ENDPOINT_INFRA_SCALE_DOWN: &str = "/api/infra/scaledown";
pub const ENDPOINT_INFRA_KILL_ALL: &str = "/api/infra/killall";
pub const ENDPOINT_INFRA_NODE_STATS: &str = "/api/infra/nodestats";

// --- Node endpoints ---

pub const ENDPOINT_NODE_DATA: &str = "/data";
/// Plain decimal text body.
pub const ENDPOINT_NODE_DATA_VERSION: &str = "/dataVersion";
pub const ENDPOINT_NODE_HEALTH: &str = "/health";
/// "Your data is stale" signal. Carries no body.
pub const ENDPOINT_NODE_NOTIFY: &str = "/notify";
pub const ENDPOINT_NODE_KILL: &str = "/kill";

/// Versioned snapshot of a dataset plus the identity of the process that produced it.
///
/// The master leaves `process_id` and `running_since` unset; a node always fills them
/// with its own pid and start time so the master can tell a restarted node apart from
/// one that stayed alive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    pub version: i64,
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Start timestamp of the producing process, in ms since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_since: Option<i64>,
}

impl DataPayload {
    /// Payload describing the authoritative dataset (no process identity).
    pub fn authoritative(version: i64, data: HashMap<String, String>) -> Self {
        Self {
            version,
            data,
            process_id: None,
            running_since: None,
        }
    }
}
