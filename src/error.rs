use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the panel
#[derive(Error, Debug)]
pub enum PanelError {
    // Configuration / descriptor errors
    #[error("{0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no usable endpoints in subscription feed")]
    NoEndpoints,

    // Selection errors
    #[error("endpoint {id} not found")]
    EndpointNotFound { id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Feed request returned HTTP {status}")]
    FeedStatus { status: u16 },

    // Daemon command errors
    #[error("{message} ({output})")]
    Command { message: String, output: String },

    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("too many SSE clients")]
    TooManyClients,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for panel operations
pub type Result<T> = std::result::Result<T, PanelError>;

impl PanelError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PanelError::InvalidRequest(_)
            | PanelError::EndpointNotFound { .. }
            | PanelError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            PanelError::InvalidCredentials | PanelError::JwtError(_) => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            PanelError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            PanelError::Network(_) | PanelError::FeedStatus { .. } | PanelError::NoEndpoints => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            PanelError::TooManyClients => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            PanelError::Config(_)
            | PanelError::Command { .. }
            | PanelError::Io(_)
            | PanelError::Json(_)
            | PanelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for PanelError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
        });
        if let PanelError::Command { output, .. } = &self {
            body["output"] = json!(output);
        }

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        PanelError::Network(err.to_string())
    }
}
