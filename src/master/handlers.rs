use axum::{
    Extension, Json, Router,
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use super::master::{Master, NodeStats};
use crate::storage::protocol::{
    DataPayload, ENDPOINT_API_DELETE, ENDPOINT_API_GET, ENDPOINT_API_SET,
    ENDPOINT_INFRA_KILL_ALL, ENDPOINT_INFRA_NODE_STATS, ENDPOINT_INFRA_SCALE_DOWN,
    ENDPOINT_INFRA_SCALE_UP, ENDPOINT_REPLICATE_DATA,
};

/// Notified when the node pool could not be shut down; the master binary stops serving
/// and exits.
pub type FatalSignal = Arc<Notify>;

pub fn router(master: Arc<Master>, fatal: FatalSignal) -> Router {
    Router::new()
        .route(ENDPOINT_REPLICATE_DATA, get(handle_replicate_data))
        .route(ENDPOINT_API_GET, get(handle_get_data))
        .route(ENDPOINT_API_SET, post(handle_set_data))
        .route(ENDPOINT_API_DELETE, post(handle_delete_data))
        .route(ENDPOINT_INFRA_SCALE_UP, post(handle_scale_up))
        .route(ENDPOINT_INFRA_SCALE_DOWN, post(handle_scale_down))
        .route(ENDPOINT_INFRA_KILL_ALL, post(handle_kill_all))
        .route(ENDPOINT_INFRA_NODE_STATS, get(handle_node_stats))
        .layer(Extension(master))
        .layer(Extension(fatal))
}

pub async fn handle_replicate_data(
    Extension(master): Extension<Arc<Master>>,
) -> Json<DataPayload> {
    tracing::debug!("Replication API: get replication data called");
    Json(master.get_replication_data().as_ref().clone())
}

pub async fn handle_get_data(
    Extension(master): Extension<Arc<Master>>,
) -> Json<HashMap<String, String>> {
    Json(master.get_data())
}

pub async fn handle_set_data(Extension(master): Extension<Arc<Master>>, body: Bytes) -> Response {
    let patch: HashMap<String, String> = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => {
            tracing::warn!("Data API: rejected set body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    tracing::info!("Data API: set called with {} keys", patch.len());
    (StatusCode::OK, Json(master.set_data(patch).await)).into_response()
}

pub async fn handle_delete_data(
    Extension(master): Extension<Arc<Master>>,
    body: Bytes,
) -> Response {
    let keys: Vec<String> = match serde_json::from_slice(&body) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("Data API: rejected delete body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    tracing::info!("Data API: delete called with {} keys", keys.len());
    (StatusCode::OK, Json(master.delete_data(keys).await)).into_response()
}

pub async fn handle_scale_up(Extension(master): Extension<Arc<Master>>) -> StatusCode {
    tracing::info!("Infra API: scale up called");
    match master.scale_up().await {
        Ok(true) => StatusCode::ACCEPTED,
        Ok(false) => StatusCode::NOT_ACCEPTABLE,
        Err(e) => {
            tracing::error!("Scale up failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_scale_down(Extension(master): Extension<Arc<Master>>) -> StatusCode {
    tracing::info!("Infra API: scale down called");
    if master.scale_down().await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_ACCEPTABLE
    }
}

pub async fn handle_kill_all(
    Extension(master): Extension<Arc<Master>>,
    Extension(fatal): Extension<FatalSignal>,
) -> StatusCode {
    match master.kill_all_nodes().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Error killing all nodes: {}", e);
            fatal.notify_one();
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_node_stats(Extension(master): Extension<Arc<Master>>) -> Json<NodeStats> {
    Json(master.node_stats().await)
}
