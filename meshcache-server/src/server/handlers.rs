use crate::cluster::{HealthReport, Node, NodeId};
use crate::core::CacheError;
use crate::node::{CacheNode, NodeStats, SetOptions};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<CacheNode>,
}

/// How a value is carried in JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    /// UTF-8 text (or any JSON value, stored as its JSON text)
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Deserialize)]
pub struct PutRequest {
    pub value: serde_json::Value,
    /// TTL in seconds
    pub ttl: Option<u64>,
    #[serde(default)]
    pub encoding: ValueEncoding,
}

#[derive(Debug, Serialize)]
pub struct PutResponse {
    pub success: bool,
    pub key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetParams {
    pub encoding: Option<ValueEncoding>,
}

#[derive(Debug, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
    pub encoding: ValueEncoding,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct LeaderResponse {
    pub node_id: NodeId,
    pub leader: Option<NodeId>,
    pub is_leader: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "meshcache",
        "node_id": state.node.node_id(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn request_bytes(request: PutRequest) -> Result<Vec<u8>, CacheError> {
    match (request.encoding, request.value) {
        (ValueEncoding::Base64, serde_json::Value::String(text)) => BASE64
            .decode(text.as_bytes())
            .map_err(|e| CacheError::InvalidRequest(format!("invalid base64 value: {}", e))),
        (ValueEncoding::Base64, _) => Err(CacheError::InvalidRequest(
            "base64 values must be strings".to_string(),
        )),
        (ValueEncoding::Utf8, serde_json::Value::String(text)) => Ok(text.into_bytes()),
        (ValueEncoding::Utf8, other) => Ok(serde_json::to_vec(&other)?),
    }
}

/// PUT /cache/{key}
pub async fn cache_put(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<PutRequest>,
) -> Result<Json<PutResponse>, CacheError> {
    debug!("REST PUT key={}, ttl={:?}", key, request.ttl);

    let mut options = SetOptions::default();
    if let Some(ttl) = request.ttl {
        options = options.with_ttl(Duration::from_secs(ttl));
    }
    let value = request_bytes(request)?;
    state.node.set_with(&key, value, options).await?;

    Ok(Json(PutResponse { success: true, key }))
}

/// GET /cache/{key}
pub async fn cache_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<GetParams>,
) -> Result<Response, CacheError> {
    debug!("REST GET key={}", key);

    let Some(bytes) = state.node.get(&key).await? else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Key not found", "key": key})),
        )
            .into_response());
    };

    let response = match params.encoding {
        Some(ValueEncoding::Base64) => GetResponse {
            key,
            value: BASE64.encode(&bytes),
            encoding: ValueEncoding::Base64,
        },
        _ => match String::from_utf8(bytes) {
            Ok(text) => GetResponse {
                key,
                value: text,
                encoding: ValueEncoding::Utf8,
            },
            Err(e) => GetResponse {
                key,
                value: BASE64.encode(e.as_bytes()),
                encoding: ValueEncoding::Base64,
            },
        },
    };
    Ok(Json(response).into_response())
}

/// DELETE /cache/{key}
pub async fn cache_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, CacheError> {
    debug!("REST DELETE key={}", key);
    let deleted = state.node.delete(&key).await?;
    Ok(Json(DeleteResponse { deleted, key }))
}

/// GET /stats
pub async fn node_stats(State(state): State<AppState>) -> Json<NodeStats> {
    Json(state.node.stats())
}

/// GET /cluster/nodes
pub async fn cluster_nodes(State(state): State<AppState>) -> Json<Vec<Node>> {
    Json(state.node.registry().all_nodes())
}

/// GET /cluster/leader
pub async fn cluster_leader(State(state): State<AppState>) -> Json<LeaderResponse> {
    Json(LeaderResponse {
        node_id: state.node.node_id().to_string(),
        leader: state.node.leader(),
        is_leader: state.node.elector().is_leader(),
    })
}

/// GET /cluster/health - last report, or a fresh check if none ran yet
pub async fn cluster_health(State(state): State<AppState>) -> Json<HealthReport> {
    let report = match state.node.last_health_report() {
        Some(report) => report,
        None => state.node.health_check_once(),
    };
    Json(report)
}
