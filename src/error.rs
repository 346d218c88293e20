use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid schema declaration: {0}")]
    InvalidSchema(String),

    #[error("Table '{table}' is not found")]
    TableMissing { table: String },

    #[error("No row for key {key} in '{table}'")]
    NotFound { table: String, key: String },

    #[error("Access token rejected by remote service")]
    Unauthorized,

    #[error("Refresh token rejected, user must authorize again")]
    ReauthorizationRequired,

    #[error("Remote service error: {status}, {body}")]
    RemoteService { status: u16, body: String },

    #[error("Malformed remote payload: {0}")]
    RemotePayload(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Whether the error is the single condition the core recovers from in-process
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Unauthorized)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => AppError::Connectivity("storage pool timed out".into()),
            sqlx::Error::PoolClosed => AppError::Connectivity("storage pool closed".into()),
            sqlx::Error::Io(e) => AppError::Connectivity(format!("storage io: {}", e)),
            sqlx::Error::Tls(e) => AppError::Connectivity(format!("storage tls: {}", e)),
            other => AppError::Database(other),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::RemotePayload(err.to_string())
        } else if err.is_timeout() {
            AppError::Connectivity(format!("request timed out: {}", err))
        } else {
            AppError::Connectivity(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Connectivity("operation timed out".into())
    }
}

/// Implement IntoResponse to convert AppError into HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::TableMissing { ref table } => {
                tracing::error!("Table missing: {}", table);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::SchemaMismatch(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidSchema(ref msg) => {
                tracing::error!("Invalid schema: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::InvalidInput(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Access token rejected by remote service".to_string(),
            ),
            AppError::ReauthorizationRequired => (
                StatusCode::UNAUTHORIZED,
                "Reauthorization required".to_string(),
            ),
            AppError::RemoteService { status, ref body } => {
                tracing::error!("Remote service error: {} {}", status, body);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Remote service responded with {}", status),
                )
            }
            AppError::RemotePayload(ref msg) => {
                tracing::error!("Remote payload error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Malformed remote response".to_string())
            }
            AppError::Connectivity(ref msg) => {
                tracing::error!("Connectivity error: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "Upstream unreachable".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application results
pub type Result<T> = std::result::Result<T, AppError>;
