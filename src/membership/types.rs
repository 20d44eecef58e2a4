use serde::{Deserialize, Serialize};

/// Lifecycle state of a node as believed by the master.
///
/// Transitions are restricted to the edges accepted by [`NodeStatus::can_transition_to`];
/// `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    /// Reserved in the pool, process not started yet.
    New,
    /// Process confirmed listening and healthy.
    Active,
    /// Told to terminate and acknowledged.
    Shutdown,
    /// Found listening during startup recovery, not yet probed.
    Zombie,
    /// Adopted from a previous master and left running at activation.
    Recovered,
    /// Failed its health probe or could not be started.
    Unrecoverable,
}

impl NodeStatus {
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;

        matches!(
            (self, next),
            (New, Active)
                | (New, Unrecoverable)
                | (Zombie, Active)
                | (Zombie, Unrecoverable)
                | (Active, Recovered)
                | (Active, Shutdown)
                | (Active, Unrecoverable)
                | (Recovered, Shutdown)
                | (Recovered, Unrecoverable)
                | (Unrecoverable, Shutdown)
        )
    }

    /// Whether a node in this state is expected to answer requests.
    pub fn is_serving(self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Recovered)
    }
}

/// The master's belief about whether a node holds the current dataset version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataQuality {
    Fresh,
    Dirty,
}

/// How a proxy entered the pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeOrigin {
    /// Created by this master (reserved with `add_node` or `scale_up`).
    Launched,
    /// Found already running during startup recovery.
    Adopted,
}
