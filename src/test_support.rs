//! Shared helpers for the in-crate test suites.

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{
    CacheConfig, LogsConfig, MasterConfig, NodesConfig, ServiceConfig, TimingsConfig,
};
use crate::master::handlers::router;
use crate::master::master::Master;
use crate::membership::process::NodeLauncher;
use crate::node::server;

/// Runs nodes as tasks of the test runtime instead of separate processes.
/// The node still serves the real router on the requested loopback port.
pub(crate) struct InProcessLauncher;

#[async_trait]
impl NodeLauncher for InProcessLauncher {
    async fn launch(&self, port: u16, master_port: u16) -> Result<u32> {
        server::start(port, master_port).await?;
        Ok(std::process::id())
    }
}

pub(crate) struct FailingLauncher;

#[async_trait]
impl NodeLauncher for FailingLauncher {
    async fn launch(&self, _port: u16, _master_port: u16) -> Result<u32> {
        Err(anyhow::anyhow!("launch refused"))
    }
}

/// Reports a started process, but nothing ever listens on the node's port.
pub(crate) struct SilentLauncher;

pub(crate) const SILENT_PID: u32 = 4242;

#[async_trait]
impl NodeLauncher for SilentLauncher {
    async fn launch(&self, _port: u16, _master_port: u16) -> Result<u32> {
        Ok(SILENT_PID)
    }
}

/// First port of `len` consecutive loopback ports that are currently free.
pub(crate) fn free_port_range(len: u16) -> u16 {
    loop {
        let base = portpicker::pick_unused_port().expect("no free port");
        if base.checked_add(len).is_none() {
            continue;
        }
        let all_free =
            (0..len).all(|offset| StdTcpListener::bind(("127.0.0.1", base + offset)).is_ok());
        if all_free {
            return base;
        }
    }
}

pub(crate) fn test_config(
    master_port: u16,
    node_port_initial: u16,
    min_count: usize,
    max_count: usize,
    recovery_scan_ports: u16,
) -> CacheConfig {
    CacheConfig {
        service: ServiceConfig {
            master: MasterConfig {
                port: master_port,
                node_port_initial,
            },
            nodes: NodesConfig {
                min_count,
                max_count,
                binary: None,
                recovery_scan_ports,
            },
            logs: LogsConfig::default(),
            timings: TimingsConfig {
                activation_delay_ms: 0,
                settle_ms: 3000,
                spawn_grace_ms: 3000,
                health_poll_ms: 20,
                request_timeout_ms: Some(2000),
            },
        },
    }
}

/// Serves `app` on an ephemeral loopback port and returns that port.
pub(crate) async fn spawn_router(app: Router) -> (u16, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, handle)
}

/// Serves the master's HTTP surface on its configured port.
pub(crate) async fn serve_master(master: Arc<Master>) -> (Arc<Notify>, JoinHandle<()>) {
    let fatal = Arc::new(Notify::new());
    let app = router(master.clone(), fatal.clone());
    let port = master.settings().master_port;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (fatal, handle)
}
