//! Relay error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Boxed error from an upstream body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Non-standard status for a request the client closed before the response
/// started.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Errors produced while relaying one chat turn.
///
/// Everything except [`RelayError::Transport`] is raised before the first
/// byte of the response stream and becomes a plain HTTP error response.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No upstream credential in the process configuration.
    #[error("Upstream API key is not configured")]
    MissingCredential,

    /// Request body is not a non-empty message list.
    #[error("Invalid message format: {0}")]
    InvalidMessages(String),

    /// Upstream answered with a non-success status.
    #[error("Upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// The inbound request was cancelled before streaming began.
    #[error("Request aborted by client")]
    Cancelled,

    /// Upstream request could not be sent.
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream connection failed mid-stream.
    #[error("Upstream transport error: {0}")]
    Transport(#[source] BoxError),

    /// A frame could not be encoded.
    #[error(transparent)]
    Frame(#[from] quill_core::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidMessages(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::MissingCredential | Self::Request(_) | Self::Transport(_) | Self::Frame(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the client; internal details stay in the logs.
    fn client_message(&self) -> String {
        match self {
            Self::MissingCredential => {
                "Server configuration error, please contact the administrator.".to_string()
            }
            Self::InvalidMessages(_) => "Invalid message format.".to_string(),
            Self::Upstream { body, .. } => format!("Upstream service error: {body}"),
            Self::Cancelled => "Request aborted".to_string(),
            Self::Request(_) | Self::Transport(_) | Self::Frame(_) => {
                "Internal server error.".to_string()
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, Self::Cancelled) {
            return (status, self.client_message()).into_response();
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}
