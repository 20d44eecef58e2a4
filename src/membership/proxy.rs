//! Node Proxy
//!
//! Master-side handle for one cache node. Every remote operation targets a fixed endpoint
//! on the node's own loopback port:
//!
//! | Operation          | Request         |
//! |--------------------|-----------------|
//! | `check_health`     | GET /health     |
//! | `get_data_version` | GET /dataVersion|
//! | `get_data`         | GET /data       |
//! | `broadcast`        | POST /notify    |
//! | `shutdown`         | POST /kill      |
//!
//! `refresh` is composed from `get_data`.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::error::NodeError;
use super::process::NodeLauncher;
use super::types::{DataQuality, NodeOrigin, NodeStatus};
use crate::storage::protocol::{
    DataPayload, ENDPOINT_NODE_DATA, ENDPOINT_NODE_DATA_VERSION, ENDPOINT_NODE_HEALTH,
    ENDPOINT_NODE_KILL, ENDPOINT_NODE_NOTIFY,
};

pub const NODE_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProxy {
    pub port: u16,
    status: NodeStatus,
    pub data_version: i64,
    pub data_quality: DataQuality,
    pub process_id: Option<u32>,
    pub running_since: Option<i64>,
    pub origin: NodeOrigin,

    #[serde(skip)]
    client: reqwest::Client,
}

impl NodeProxy {
    /// A proxy for a node this master is about to launch.
    pub fn new(port: u16, client: reqwest::Client) -> Self {
        Self {
            port,
            status: NodeStatus::New,
            data_version: 0,
            data_quality: DataQuality::Dirty,
            process_id: None,
            running_since: None,
            origin: NodeOrigin::Launched,
            client,
        }
    }

    /// Probes a port that may already host a node from a previous master.
    ///
    /// The candidate starts as `Zombie`; a healthy answer makes it `Active` and records
    /// the version it reports, anything else makes it `Unrecoverable`.
    pub async fn probe(port: u16, client: reqwest::Client) -> Self {
        let mut node = Self::new(port, client);
        node.status = NodeStatus::Zombie;
        node.origin = NodeOrigin::Adopted;

        let health = node.check_health().await;
        if let Err(e) = node.transition(health) {
            tracing::warn!("Probe of port {}: {}", port, e);
        }
        if node.status == NodeStatus::Active {
            node.data_version = node.get_data_version().await;
        }
        node
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Moves the proxy to `next`, rejecting edges outside the state machine.
    pub fn transition(&mut self, next: NodeStatus) -> Result<(), NodeError> {
        if !self.status.can_transition_to(next) {
            return Err(NodeError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!("Node {}: {:?} -> {:?}", self.port, self.status, next);
        self.status = next;
        Ok(())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("http://{}:{}{}", NODE_HOST, self.port, endpoint)
    }

    /// Starts the node process through `launcher` and records its pid.
    ///
    /// The proxy stays `New` until [`NodeProxy::await_ready`] has seen the process answer.
    /// On a launch failure nothing changes, so activation can retry it.
    pub async fn start(
        &mut self,
        launcher: &dyn NodeLauncher,
        master_port: u16,
    ) -> anyhow::Result<()> {
        let pid = launcher.launch(self.port, master_port).await?;
        self.process_id = Some(pid);
        tracing::info!("Launched node on port {} (pid {})", self.port, pid);
        Ok(())
    }

    /// Waits up to `grace` for a launched node to answer `/health`, then moves it to
    /// `Active`, or to `Unrecoverable` when it never did. Returns whether it is `Active`.
    pub async fn await_ready(&mut self, grace: Duration, poll: Duration) -> bool {
        let ready = self.wait_until_healthy(grace, poll).await;
        let next = if ready {
            NodeStatus::Active
        } else {
            NodeStatus::Unrecoverable
        };

        match self.transition(next) {
            Ok(()) => ready,
            Err(e) => {
                tracing::warn!("Node {}: {}", self.port, e);
                false
            }
        }
    }

    pub async fn check_health(&self) -> NodeStatus {
        match self.client.get(self.url(ENDPOINT_NODE_HEALTH)).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => NodeStatus::Active,
            Ok(resp) => {
                tracing::debug!("Node {} health answered {}", self.port, resp.status());
                NodeStatus::Unrecoverable
            }
            Err(_) => NodeStatus::Unrecoverable,
        }
    }

    /// Polls `/health` until the node answers or `grace` elapses.
    pub async fn wait_until_healthy(&self, grace: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + grace;

        loop {
            if self.check_health().await == NodeStatus::Active {
                return true;
            }
            if Instant::now() + poll > deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// The node's version as reported by `/dataVersion`, or -1 when it cannot be obtained.
    pub async fn get_data_version(&self) -> i64 {
        let resp = match self
            .client
            .get(self.url(ENDPOINT_NODE_DATA_VERSION))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            _ => return -1,
        };

        match resp.text().await {
            Ok(body) => body.trim().parse().unwrap_or(-1),
            Err(_) => -1,
        }
    }

    pub async fn get_data(&self) -> Result<DataPayload, NodeError> {
        let resp = self.client.get(self.url(ENDPOINT_NODE_DATA)).send().await?;

        if !resp.status().is_success() {
            return Err(NodeError::Status(resp.status()));
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|_| NodeError::NoData)
    }

    /// Tells the node its data is stale so it pulls `version` from the master.
    ///
    /// Skipped without any network call when the node is already known to hold
    /// `version` or newer.
    pub async fn broadcast(&mut self, version: i64) -> Result<(), NodeError> {
        if version <= self.data_version {
            return Ok(());
        }

        self.data_quality = DataQuality::Dirty;
        let resp = self.client.post(self.url(ENDPOINT_NODE_NOTIFY)).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(NodeError::Status(resp.status()));
        }

        self.data_quality = DataQuality::Fresh;
        self.data_version = version;
        Ok(())
    }

    /// Asks the node to terminate. The proxy becomes `Shutdown` once acknowledged.
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        let resp = self.client.post(self.url(ENDPOINT_NODE_KILL)).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(NodeError::Status(resp.status()));
        }

        if let Err(e) = self.transition(NodeStatus::Shutdown) {
            tracing::warn!("Node {} acknowledged shutdown: {}", self.port, e);
        }
        Ok(())
    }

    /// Pulls the node's live payload and recomputes data quality against `master_version`.
    pub async fn refresh(&mut self, master_version: i64) -> Result<(), NodeError> {
        let payload = self.get_data().await?;

        tracing::info!(
            "Node refresh: port {}, node version {}, master version {}",
            self.port,
            payload.version,
            master_version
        );

        self.data_version = payload.version;
        self.process_id = payload.process_id;
        self.running_since = payload.running_since;
        self.data_quality = if payload.version == master_version {
            DataQuality::Fresh
        } else {
            DataQuality::Dirty
        };
        Ok(())
    }
}
