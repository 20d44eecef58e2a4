use axum::{Extension, Json, http::StatusCode, http::header};
use std::sync::Arc;

use super::server::CacheNode;
use crate::storage::protocol::DataPayload;

pub async fn handle_data(Extension(node): Extension<Arc<CacheNode>>) -> Json<DataPayload> {
    Json(node.payload().await)
}

pub async fn handle_data_version(
    Extension(node): Extension<Arc<CacheNode>>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        node.version().await.to_string(),
    )
}

pub async fn handle_health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Pulls the master's snapshot and replaces the local replica with it.
pub async fn handle_notify(Extension(node): Extension<Arc<CacheNode>>) -> (StatusCode, String) {
    match node.pull_from_master().await {
        Ok(version) => {
            tracing::info!("Replica updated to version {}", version);
            (StatusCode::OK, version.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to pull data from master: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to consume master API".to_string(),
            )
        }
    }
}

pub async fn handle_kill(Extension(node): Extension<Arc<CacheNode>>) -> (StatusCode, &'static str) {
    node.request_shutdown();
    (StatusCode::OK, "Shutting down node...")
}
