use thiserror::Error;

use super::types::NodeStatus;

/// Failures of a single master-to-node interaction.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node could not be reached (connection refused, reset, timeout).
    #[error("node unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered, but the body was not a valid payload.
    #[error("no data")]
    NoData,

    /// The node answered with a non-success status code.
    #[error("node answered {0}")]
    Status(reqwest::StatusCode),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: NodeStatus, to: NodeStatus },
}
