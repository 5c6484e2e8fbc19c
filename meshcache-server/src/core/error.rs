use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for cache coordination
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("Corrupt entry for key {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Sync conflict on key {key}: local version {local_version}, remote version {remote_version}")]
    SyncConflict {
        key: String,
        local_version: u64,
        remote_version: u64,
    },

    #[error("Conflict unresolved for key {0}")]
    ConflictUnresolved(String),

    #[error("Retry exhausted for key {key} after {attempts} attempts")]
    RetryExhausted { key: String, attempts: u32 },

    #[error("No nodes registered in cluster")]
    NoNodes,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NodeUnavailable(_) | Self::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoNodes => StatusCode::SERVICE_UNAVAILABLE,
            Self::SyncConflict { .. } | Self::ConflictUnresolved(_) => StatusCode::CONFLICT,
            Self::NodeNotFound(_) => StatusCode::NOT_FOUND,
            Self::NodeExists(_) => StatusCode::CONFLICT,
            Self::InvalidConfig(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::CorruptEntry { .. }
            | Self::RetryExhausted { .. }
            | Self::Codec(_)
            | Self::Serialization(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller or queue may retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_) | Self::Transport(_))
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Transport(e.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
