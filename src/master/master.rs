//! Master Orchestration
//!
//! The master owns the authoritative dataset, its version and the ordered pool of node
//! proxies. All three live in one `MasterState` behind a single mutex: every mutation and
//! every broadcast/refresh pass holds it, so mutating calls serialize and always see a
//! consistent map + version + pool.
//!
//! Readers never take that mutex. Each commit publishes an immutable `DataPayload`
//! snapshot on a watch channel, which `get_data` and the replication endpoint read. This
//! also lets nodes pull the snapshot while a broadcast still holds the mutex.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::config::{CacheConfig, TimingsConfig};
use crate::membership::error::NodeError;
use crate::membership::process::NodeLauncher;
use crate::membership::proxy::NodeProxy;
use crate::membership::types::{NodeOrigin, NodeStatus};
use crate::storage::memory::{VersionedMap, now_ms};
use crate::storage::protocol::DataPayload;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("failed to launch node on port {port}: {source:#}")]
    Launch {
        port: u16,
        #[source]
        source: anyhow::Error,
    },

    #[error("node on port {port} did not answer within {grace:?}")]
    NotReady { port: u16, grace: Duration },

    #[error("node with port {port} could not be stopped: {source}")]
    ShutdownFailed {
        port: u16,
        #[source]
        source: NodeError,
    },
}

/// The subset of configuration the master acts on.
#[derive(Debug, Clone)]
pub struct MasterSettings {
    pub master_port: u16,
    pub node_port_initial: u16,
    pub min_count: usize,
    pub max_count: usize,
    pub recovery_scan_ports: u16,
    pub timings: TimingsConfig,
}

impl From<&CacheConfig> for MasterSettings {
    fn from(config: &CacheConfig) -> Self {
        let service = &config.service;
        Self {
            master_port: service.master.port,
            node_port_initial: service.master.node_port_initial,
            min_count: service.nodes.min_count,
            max_count: service.nodes.max_count,
            recovery_scan_ports: service.nodes.recovery_scan_ports,
            timings: service.timings.clone(),
        }
    }
}

/// Response body of the node stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub node_count: usize,
    pub data_version_id: i64,
    pub nodes: Vec<NodeProxy>,
}

struct MasterState {
    store: VersionedMap,
    /// Insertion order doubles as eviction order for scale-down.
    nodes: VecDeque<NodeProxy>,
    /// Monotonically increasing, ports are never reused.
    next_node_port: u16,
}

pub struct Master {
    settings: MasterSettings,
    launcher: Arc<dyn NodeLauncher>,
    http_client: reqwest::Client,
    state: Mutex<MasterState>,
    snapshot: watch::Sender<Arc<DataPayload>>,
}

impl Master {
    /// Builds the master, recovers nodes left running by a previous master and launches
    /// fresh nodes until the configured minimum is met.
    ///
    /// No broadcast happens here: the replication endpoint is not served yet. Call
    /// [`Master::make_available`] once the HTTP server is listening.
    pub async fn initialize(
        config: &CacheConfig,
        launcher: Arc<dyn NodeLauncher>,
    ) -> anyhow::Result<Arc<Self>> {
        let settings = MasterSettings::from(config);

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let (snapshot, _) = watch::channel(Arc::new(DataPayload::default()));
        let master = Self {
            state: Mutex::new(MasterState {
                store: VersionedMap::default(),
                nodes: VecDeque::with_capacity(settings.min_count),
                next_node_port: settings.node_port_initial,
            }),
            settings,
            launcher,
            http_client,
            snapshot,
        };

        {
            let mut guard = master.state.lock().await;
            let state = &mut *guard;
            master.recover_nodes(state).await;
            master.publish(state);
            master.fill_to_minimum(state).await;
        }

        Ok(Arc::new(master))
    }

    pub fn settings(&self) -> &MasterSettings {
        &self.settings
    }

    /// Adopts healthy nodes found on the recovery port range and takes over the dataset
    /// of the freshest one.
    ///
    /// The version is stamped only after the scan: it is the adopted node's version when a
    /// snapshot was recovered, the current time otherwise.
    async fn recover_nodes(&self, state: &mut MasterState) {
        let start = self.settings.node_port_initial;
        let scan = self.settings.recovery_scan_ports;
        tracing::info!("Trying to recover nodes on {} ports from {}", scan, start);

        for offset in 0..scan {
            let Some(port) = start.checked_add(offset) else {
                break;
            };
            let candidate = NodeProxy::probe(port, self.http_client.clone()).await;

            if candidate.status() == NodeStatus::Active {
                tracing::info!(
                    "Recovered node on port {} (version {})",
                    port,
                    candidate.data_version
                );
                state.next_node_port = port.saturating_add(1);
                state.nodes.push_back(candidate);
            }
        }

        let mut recovered = None;
        if let Some(freshest) = state.nodes.iter().max_by_key(|node| node.data_version) {
            match freshest.get_data().await {
                Ok(payload) => {
                    tracing::info!(
                        "Adopting {} keys at version {} from node {}",
                        payload.data.len(),
                        payload.version,
                        freshest.port
                    );
                    recovered = Some(payload);
                }
                Err(e) => {
                    tracing::warn!("Could not recover data from node {}: {}", freshest.port, e);
                }
            }
        }

        state.store = match recovered {
            Some(payload) if payload.version > 0 => {
                VersionedMap::new(payload.data, payload.version)
            }
            Some(payload) => VersionedMap::new(payload.data, now_ms()),
            None => VersionedMap::new(HashMap::new(), now_ms()),
        };
    }

    async fn fill_to_minimum(&self, state: &mut MasterState) {
        if state.nodes.len() >= self.settings.min_count {
            return;
        }
        tracing::info!(
            "Scaling from {} to the minimum of {} nodes",
            state.nodes.len(),
            self.settings.min_count
        );

        // One attempt per missing slot. Launch failures stay `New` for `make_available`.
        let missing = self.settings.min_count - state.nodes.len();
        for _ in 0..missing {
            if !self.add_node_locked(state) {
                break;
            }
            let Some(node) = state.nodes.back_mut() else {
                break;
            };
            let grace = self.settings.timings.spawn_grace();
            if let Err(e) = self.launch_and_confirm(node, grace).await {
                tracing::error!("{}", e);
            }
        }

        self.evict_unrecoverable(state);
        if state.nodes.len() < self.settings.min_count {
            tracing::warn!(
                "Pool holds {} nodes, below the minimum of {}",
                state.nodes.len(),
                self.settings.min_count
            );
        }
    }

    /// Reserves one proxy at the next port in `New` status without starting its process
    /// or broadcasting. Returns false when the pool is already at its maximum.
    pub async fn add_node(&self) -> bool {
        let mut state = self.state.lock().await;
        self.add_node_locked(&mut state)
    }

    fn add_node_locked(&self, state: &mut MasterState) -> bool {
        if state.nodes.len() >= self.settings.max_count {
            return false;
        }
        let node = self.reserve_proxy(state);
        state.nodes.push_back(node);
        true
    }

    fn reserve_proxy(&self, state: &mut MasterState) -> NodeProxy {
        let port = state.next_node_port;
        state.next_node_port = port.saturating_add(1);
        NodeProxy::new(port, self.http_client.clone())
    }

    async fn start_node(&self, node: &mut NodeProxy) -> Result<(), MasterError> {
        let port = node.port;
        node.start(self.launcher.as_ref(), self.settings.master_port)
            .await
            .map_err(|source| MasterError::Launch { port, source })
    }

    /// Launches `node` and waits up to `grace` for it to become `Active`.
    async fn launch_and_confirm(
        &self,
        node: &mut NodeProxy,
        grace: Duration,
    ) -> Result<(), MasterError> {
        self.start_node(node).await?;
        if node.await_ready(grace, self.settings.timings.health_poll()).await {
            Ok(())
        } else {
            Err(MasterError::NotReady {
                port: node.port,
                grace,
            })
        }
    }

    /// Drops proxies the master can no longer drive from the pool.
    fn evict_unrecoverable(&self, state: &mut MasterState) {
        state.nodes.retain(|node| {
            if node.status() != NodeStatus::Unrecoverable {
                return true;
            }
            tracing::warn!(
                "Evicting unrecoverable node on port {} (pid {:?})",
                node.port,
                node.process_id
            );
            false
        });
    }

    /// Launches one more node and converges the whole pool on the current version.
    ///
    /// Returns `Ok(false)` without side effects when the pool is at its maximum. A launch
    /// failure, or a node that does not answer within the spawn grace period, is an error
    /// and leaves the pool unchanged (the port is still consumed).
    pub async fn scale_up(&self) -> Result<bool, MasterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.nodes.len() >= self.settings.max_count {
            return Ok(false);
        }

        let mut node = self.reserve_proxy(state);
        let grace = self.settings.timings.spawn_grace();
        self.launch_and_confirm(&mut node, grace).await?;
        state.nodes.push_back(node);
        tracing::info!("Scaled up to {} nodes", state.nodes.len());

        self.broadcast_locked(state).await;
        self.refresh_locked(state).await;
        Ok(true)
    }

    /// Shuts down the oldest node. Returns false when the pool is at its minimum or the node
    /// refused to stop, leaving the pool unchanged in both cases.
    pub async fn scale_down(&self) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.nodes.len() <= self.settings.min_count {
            return false;
        }
        let Some(oldest) = state.nodes.front_mut() else {
            return false;
        };

        if let Err(e) = oldest.shutdown().await {
            tracing::warn!("Could not shutdown node {}: {}", oldest.port, e);
            return false;
        }

        if let Some(removed) = state.nodes.pop_front() {
            tracing::info!(
                "Scaled down: removed node {}, {} remaining",
                removed.port,
                state.nodes.len()
            );
        }
        self.refresh_locked(state).await;
        true
    }

    /// One-time activation once the HTTP surface is being served.
    ///
    /// Starts every proxy still in `New` and marks adopted nodes that still answer
    /// `Recovered` without restarting them. Started nodes get until the settle deadline to
    /// answer. Nodes that ended `Unrecoverable` are evicted before the pool is broadcast
    /// and refreshed.
    pub async fn make_available(&self) {
        tracing::info!("Master: made available");
        tokio::time::sleep(self.settings.timings.activation_delay()).await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let deadline = Instant::now() + self.settings.timings.settle();
        let mut started = Vec::new();

        for (idx, node) in state.nodes.iter_mut().enumerate() {
            match node.status() {
                NodeStatus::New => match self.start_node(node).await {
                    Ok(()) => started.push(idx),
                    Err(e) => tracing::error!("{}", e),
                },
                NodeStatus::Active if node.origin == NodeOrigin::Adopted => {
                    let next = if node.check_health().await == NodeStatus::Active {
                        tracing::info!("Node {} is still running, will recover it", node.port);
                        NodeStatus::Recovered
                    } else {
                        tracing::warn!("Node {} stopped answering since recovery", node.port);
                        NodeStatus::Unrecoverable
                    };
                    if let Err(e) = node.transition(next) {
                        tracing::warn!("Node {}: {}", node.port, e);
                    }
                }
                _ => {}
            }
        }

        let poll = self.settings.timings.health_poll();
        for idx in started {
            if let Some(node) = state.nodes.get_mut(idx) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !node.await_ready(remaining, poll).await {
                    tracing::warn!("Node {} did not come up before the settle deadline", node.port);
                }
            }
        }
        self.evict_unrecoverable(state);

        self.broadcast_locked(state).await;
        self.refresh_locked(state).await;
    }

    /// Stops every node in pool order. The first failure aborts the pass and is fatal
    /// for the master.
    pub async fn kill_all_nodes(&self) -> Result<(), MasterError> {
        tracing::info!("Master: kill all nodes triggered");
        let mut state = self.state.lock().await;

        while let Some(node) = state.nodes.front_mut() {
            let port = node.port;
            if let Err(source) = node.shutdown().await {
                tracing::error!("Node with port {} could not be stopped: {}", port, source);
                return Err(MasterError::ShutdownFailed { port, source });
            }
            state.nodes.pop_front();
        }
        Ok(())
    }

    /// The current authoritative map.
    pub fn get_data(&self) -> HashMap<String, String> {
        self.snapshot.borrow().data.clone()
    }

    /// The snapshot nodes pull during replication.
    pub fn get_replication_data(&self) -> Arc<DataPayload> {
        self.snapshot.borrow().clone()
    }

    pub fn version(&self) -> i64 {
        self.snapshot.borrow().version
    }

    /// Merges `patch` into the dataset, stamps a new version and broadcasts it.
    /// Returns the updated map.
    pub async fn set_data(&self, patch: HashMap<String, String>) -> HashMap<String, String> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let version = state.store.merge(patch);
        self.publish(state);
        tracing::info!("Data set, version {}", version);

        self.broadcast_locked(state).await;
        state.store.data().clone()
    }

    /// Removes the listed keys (missing ones are ignored), stamps a new version and
    /// broadcasts it. Returns the updated map.
    pub async fn delete_data(&self, keys: Vec<String>) -> HashMap<String, String> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let version = state.store.remove(keys);
        self.publish(state);
        tracing::info!("Data deleted, version {}", version);

        self.broadcast_locked(state).await;
        state.store.data().clone()
    }

    pub async fn broadcast(&self) {
        let mut state = self.state.lock().await;
        self.broadcast_locked(&mut state).await;
    }

    /// Best-effort push to every serving node: failures are logged per node and never stop
    /// the pass.
    async fn broadcast_locked(&self, state: &mut MasterState) {
        let version = state.store.version();
        tracing::info!("Master: sending broadcast (version {})", version);

        for node in state.nodes.iter_mut().filter(|n| n.status().is_serving()) {
            if let Err(e) = node.broadcast(version).await {
                tracing::warn!("Could not broadcast to node {}: {}", node.port, e);
            }
        }
    }

    pub async fn refresh_all(&self) {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
    }

    async fn refresh_locked(&self, state: &mut MasterState) {
        tracing::debug!("Master: node refresh running");
        let version = state.store.version();

        for node in state.nodes.iter_mut().filter(|n| n.status().is_serving()) {
            if let Err(e) = node.refresh(version).await {
                tracing::warn!("Could not refresh node {}: {}", node.port, e);
            }
        }
    }

    pub async fn node_stats(&self) -> NodeStats {
        let state = self.state.lock().await;
        NodeStats {
            node_count: state.nodes.len(),
            data_version_id: state.store.version(),
            nodes: state.nodes.iter().cloned().collect(),
        }
    }

    fn publish(&self, state: &MasterState) {
        self.snapshot.send_replace(Arc::new(state.store.to_payload()));
    }
}
