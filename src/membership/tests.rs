//! Membership Module Tests
//!
//! Validates the master-side node proxy.
//!
//! ## Test Scopes
//! - **State Machine**: Legal and illegal status transitions.
//! - **Remote Control**: Health, version, snapshot, notify, refresh and shutdown against live
//!   in-process nodes, unreachable ports and misbehaving servers.
//! - **Process Launching**: Spawning a detached process with captured output.

#[cfg(test)]
mod tests {
    use crate::membership::error::NodeError;
    use crate::membership::process::{NodeLauncher, ProcessLauncher};
    use crate::membership::proxy::NodeProxy;
    use crate::membership::types::{DataQuality, NodeOrigin, NodeStatus};
    use crate::node::server;
    use crate::storage::protocol::DataPayload;
    use crate::test_support::{SILENT_PID, SilentLauncher, free_port_range, spawn_router};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::time::Duration;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    /// A stand-in master that serves a fixed replication snapshot.
    async fn fake_master(version: i64, pairs: &[(&str, &str)]) -> u16 {
        let data: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let payload = DataPayload::authoritative(version, data);
        let app = Router::new().route(
            "/replicate/data",
            get(move || {
                let payload = payload.clone();
                async move { Json(payload) }
            }),
        );
        spawn_router(app).await.0
    }

    async fn live_node(master_port: u16) -> u16 {
        let port = free_port_range(1);
        server::start(port, master_port).await.unwrap();
        port
    }

    // ============================================================
    // STATE MACHINE TESTS
    // ============================================================

    #[test]
    fn test_allowed_transitions() {
        use NodeStatus::*;

        assert!(New.can_transition_to(Active));
        assert!(New.can_transition_to(Unrecoverable));
        assert!(Zombie.can_transition_to(Active));
        assert!(Zombie.can_transition_to(Unrecoverable));
        assert!(Active.can_transition_to(Recovered));
        assert!(Active.can_transition_to(Shutdown));
        assert!(Recovered.can_transition_to(Shutdown));
        assert!(Unrecoverable.can_transition_to(Shutdown));
    }

    #[test]
    fn test_rejected_transitions() {
        use NodeStatus::*;

        assert!(!New.can_transition_to(Recovered));
        assert!(!New.can_transition_to(Zombie));
        assert!(!Zombie.can_transition_to(Recovered));
        assert!(!Recovered.can_transition_to(Active));
        assert!(!Shutdown.can_transition_to(Active));
        assert!(!Shutdown.can_transition_to(Shutdown));
    }

    #[test]
    fn test_illegal_transition_leaves_proxy_unchanged() {
        let mut node = NodeProxy::new(9000, client());

        let err = node.transition(NodeStatus::Recovered).unwrap_err();

        assert!(matches!(
            err,
            NodeError::IllegalTransition {
                from: NodeStatus::New,
                to: NodeStatus::Recovered
            }
        ));
        assert_eq!(node.status(), NodeStatus::New);
    }

    #[test]
    fn test_serving_states() {
        assert!(NodeStatus::Active.is_serving());
        assert!(NodeStatus::Recovered.is_serving());
        assert!(!NodeStatus::New.is_serving());
        assert!(!NodeStatus::Zombie.is_serving());
        assert!(!NodeStatus::Shutdown.is_serving());
    }

    #[test]
    fn test_new_proxy_defaults_and_serialization() {
        let node = NodeProxy::new(9001, client());

        assert_eq!(node.status(), NodeStatus::New);
        assert_eq!(node.data_quality, DataQuality::Dirty);
        assert_eq!(node.origin, NodeOrigin::Launched);

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["port"], 9001);
        assert_eq!(json["status"], "New");
        assert_eq!(json["dataQuality"], "Dirty");
        assert_eq!(json["dataVersion"], 0);
        assert_eq!(json["origin"], "launched");
        assert!(json.get("client").is_none());
    }

    // ============================================================
    // UNREACHABLE NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unreachable_node_reports_failures() {
        let node = NodeProxy::new(free_port_range(1), client());

        assert_eq!(node.check_health().await, NodeStatus::Unrecoverable);
        assert_eq!(node.get_data_version().await, -1);
        assert!(matches!(node.get_data().await, Err(NodeError::Transport(_))));
        assert!(
            !node
                .wait_until_healthy(Duration::from_millis(100), Duration::from_millis(20))
                .await
        );
    }

    #[tokio::test]
    async fn test_launched_node_stays_new_until_it_answers() {
        let mut node = NodeProxy::new(free_port_range(1), client());

        node.start(&SilentLauncher, 8080).await.unwrap();
        assert_eq!(node.status(), NodeStatus::New);
        assert_eq!(node.process_id, Some(SILENT_PID));

        let ready = node
            .await_ready(Duration::from_millis(100), Duration::from_millis(20))
            .await;

        assert!(!ready);
        assert_eq!(node.status(), NodeStatus::Unrecoverable);
    }

    #[tokio::test]
    async fn test_probe_of_empty_port_is_unrecoverable() {
        let node = NodeProxy::probe(free_port_range(1), client()).await;

        assert_eq!(node.status(), NodeStatus::Unrecoverable);
        assert_eq!(node.origin, NodeOrigin::Adopted);
    }

    #[tokio::test]
    async fn test_broadcast_skips_when_node_already_has_version() {
        // Nothing listens on this port: any network call would fail.
        let mut node = NodeProxy::new(free_port_range(1), client());
        node.data_version = 100;
        node.data_quality = DataQuality::Fresh;

        node.broadcast(100).await.unwrap();
        node.broadcast(42).await.unwrap();

        assert_eq!(node.data_version, 100);
        assert_eq!(node.data_quality, DataQuality::Fresh);
    }

    #[tokio::test]
    async fn test_failed_broadcast_marks_dirty() {
        let mut node = NodeProxy::new(free_port_range(1), client());
        node.data_version = 10;
        node.data_quality = DataQuality::Fresh;

        let result = node.broadcast(11).await;

        assert!(matches!(result, Err(NodeError::Transport(_))));
        assert_eq!(node.data_quality, DataQuality::Dirty);
        assert_eq!(node.data_version, 10);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_proxy_unchanged() {
        let mut node = NodeProxy::new(free_port_range(1), client());
        node.data_version = 5;

        assert!(node.refresh(5).await.is_err());
        assert_eq!(node.data_version, 5);
        assert_eq!(node.data_quality, DataQuality::Dirty);
    }

    // ============================================================
    // LIVE NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_probe_adopts_live_node() {
        let master_port = fake_master(1, &[]).await;
        let port = live_node(master_port).await;

        let node = NodeProxy::probe(port, client()).await;

        assert_eq!(node.status(), NodeStatus::Active);
        assert_eq!(node.data_version, 0);
        assert_eq!(node.origin, NodeOrigin::Adopted);
    }

    #[tokio::test]
    async fn test_await_ready_activates_listening_node() {
        let master_port = fake_master(1, &[]).await;
        let port = live_node(master_port).await;
        let mut node = NodeProxy::new(port, client());

        let ready = node
            .await_ready(Duration::from_secs(2), Duration::from_millis(20))
            .await;

        assert!(ready);
        assert_eq!(node.status(), NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_broadcast_then_refresh_converges() {
        let master_port = fake_master(77, &[("a", "1")]).await;
        let port = live_node(master_port).await;
        let mut node = NodeProxy::new(port, client());

        node.broadcast(77).await.unwrap();
        assert_eq!(node.data_quality, DataQuality::Fresh);
        assert_eq!(node.data_version, 77);

        let payload = node.get_data().await.unwrap();
        assert_eq!(payload.version, 77);
        assert_eq!(payload.data.get("a").map(String::as_str), Some("1"));
        assert_eq!(payload.process_id, Some(std::process::id()));
        assert_eq!(node.get_data_version().await, 77);

        node.refresh(77).await.unwrap();
        assert_eq!(node.data_quality, DataQuality::Fresh);
        assert_eq!(node.process_id, Some(std::process::id()));
        assert!(node.running_since.is_some());

        node.refresh(78).await.unwrap();
        assert_eq!(node.data_quality, DataQuality::Dirty);
        assert_eq!(node.data_version, 77);
    }

    #[tokio::test]
    async fn test_notify_failure_on_node_side_keeps_proxy_dirty() {
        // The node's master port has nothing behind it, so its pull fails with 500.
        let port = live_node(free_port_range(1)).await;
        let mut node = NodeProxy::new(port, client());

        let result = node.broadcast(5).await;

        assert!(matches!(
            result,
            Err(NodeError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        ));
        assert_eq!(node.data_quality, DataQuality::Dirty);
        assert_eq!(node.data_version, 0);
    }

    #[tokio::test]
    async fn test_shutdown_live_node() {
        let master_port = fake_master(1, &[]).await;
        let port = live_node(master_port).await;
        let mut node = NodeProxy::new(port, client());
        node.transition(NodeStatus::Active).unwrap();

        node.shutdown().await.unwrap();

        assert_eq!(node.status(), NodeStatus::Shutdown);
    }

    // ============================================================
    // MISBEHAVING NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_malformed_payloads_are_rejected() {
        let app = Router::new()
            .route("/data", get(|| async { "definitely not json" }))
            .route("/dataVersion", get(|| async { "v12" }))
            .route(
                "/kill",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "stuck") }),
            );
        let (port, _server) = spawn_router(app).await;
        let mut node = NodeProxy::new(port, client());
        node.transition(NodeStatus::Active).unwrap();

        assert!(matches!(node.get_data().await, Err(NodeError::NoData)));
        assert_eq!(node.get_data_version().await, -1);
        assert!(matches!(
            node.shutdown().await,
            Err(NodeError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        ));
        assert_eq!(node.status(), NodeStatus::Active);
    }

    // ============================================================
    // PROCESS LAUNCHER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_launcher_reports_missing_binary() {
        let launcher = ProcessLauncher::new("/definitely/not/a/cache-node".into(), None);

        assert!(launcher.launch(9000, 8080).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launcher_spawns_detached_process_with_log_file() {
        let logs = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new("/bin/sh".into(), Some(logs.path().join("nodes")));

        // `sh 8080 9000` fails to find a script named 8080; the process still starts.
        let pid = launcher.launch(9000, 8080).await.unwrap();

        assert!(pid > 0);
        assert!(logs.path().join("nodes").join("node-9000.log").exists());
    }
}
