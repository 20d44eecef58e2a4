use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::handlers::{handle_data, handle_data_version, handle_health, handle_kill, handle_notify};
use crate::membership::proxy::NODE_HOST;
use crate::storage::memory::{VersionedMap, now_ms};
use crate::storage::protocol::{
    DataPayload, ENDPOINT_NODE_DATA, ENDPOINT_NODE_DATA_VERSION, ENDPOINT_NODE_HEALTH,
    ENDPOINT_NODE_KILL, ENDPOINT_NODE_NOTIFY, ENDPOINT_REPLICATE_DATA,
};

/// Upper bound on in-flight request draining after a shutdown request.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// One replica of the dataset plus the identity of the process holding it.
pub struct CacheNode {
    pub port: u16,
    master_url: String,
    process_id: u32,
    running_since: i64,
    replica: RwLock<VersionedMap>,
    shutdown: mpsc::Sender<()>,
    http_client: reqwest::Client,
}

impl CacheNode {
    pub fn new(port: u16, master_port: u16, shutdown: mpsc::Sender<()>) -> Self {
        Self {
            port,
            master_url: format!("http://{}:{}", NODE_HOST, master_port),
            process_id: std::process::id(),
            running_since: now_ms(),
            replica: RwLock::new(VersionedMap::default()),
            shutdown,
            http_client: reqwest::Client::new(),
        }
    }

    pub async fn payload(&self) -> DataPayload {
        let replica = self.replica.read().await;
        DataPayload {
            version: replica.version(),
            data: replica.data().clone(),
            process_id: Some(self.process_id),
            running_since: Some(self.running_since),
        }
    }

    pub async fn version(&self) -> i64 {
        self.replica.read().await.version()
    }

    /// Fetches the master's replication snapshot and replaces the replica wholesale.
    /// Returns the version now held.
    pub async fn pull_from_master(&self) -> Result<i64> {
        let url = format!("{}{}", self.master_url, ENDPOINT_REPLICATE_DATA);
        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Replication pull failed {}", response.status()));
        }

        let snapshot: DataPayload = response.json().await?;
        let version = snapshot.version;
        self.replica.write().await.replace(snapshot.data, version);
        Ok(version)
    }

    /// Enqueues a shutdown request. Repeated requests collapse into the pending one.
    pub fn request_shutdown(&self) {
        if self.shutdown.try_send(()).is_err() {
            tracing::debug!("Shutdown already requested");
        }
    }
}

pub fn router(node: Arc<CacheNode>) -> Router {
    Router::new()
        .route(ENDPOINT_NODE_DATA, get(handle_data))
        .route(ENDPOINT_NODE_DATA_VERSION, get(handle_data_version))
        .route(ENDPOINT_NODE_HEALTH, get(handle_health))
        .route(ENDPOINT_NODE_NOTIFY, post(handle_notify))
        .route(ENDPOINT_NODE_KILL, post(handle_kill))
        .layer(Extension(node))
}

/// Binds the node's loopback port and starts serving on a background task.
///
/// The returned handle resolves once the node has shut down (after `/kill` and the drain
/// period) or the listener failed.
pub async fn start(
    port: u16,
    master_port: u16,
) -> Result<(Arc<CacheNode>, JoinHandle<Result<()>>)> {
    let addr: SocketAddr = format!("{}:{}", NODE_HOST, port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not listen on port {}", port))?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let node = Arc::new(CacheNode::new(port, master_port, shutdown_tx));

    tracing::info!("Node running on port {} (master port {})", port, master_port);

    let handle = tokio::spawn(serve(listener, node.clone(), shutdown_rx));
    Ok((node, handle))
}

/// Serves until a shutdown request arrives, then drains for at most `SHUTDOWN_DRAIN`.
pub async fn serve(
    listener: TcpListener,
    node: Arc<CacheNode>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let port = node.port;
    let app = router(node);
    let (drain_tx, drain_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_rx.recv().await;
        tracing::info!("Shutting down node on port {}...", port);
        let _ = drain_tx.send(());
    });
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut handle => {
            result??;
            return Ok(());
        }
        _ = drain_rx => {}
    }

    match tokio::time::timeout(SHUTDOWN_DRAIN, &mut handle).await {
        Ok(result) => {
            result??;
            tracing::info!("Node on port {} exited cleanly", port);
        }
        Err(_) => {
            handle.abort();
            tracing::warn!("Node on port {} forced to shutdown after {:?}", port, SHUTDOWN_DRAIN);
        }
    }

    Ok(())
}

/// Entry point of the `cache-node` binary.
pub async fn run(port: u16, master_port: u16) -> Result<()> {
    let (_node, handle) = start(port, master_port).await?;
    handle.await?
}
