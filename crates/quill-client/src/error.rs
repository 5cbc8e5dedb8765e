//! Client error types.

/// Boxed error from a response body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the session client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A turn is already streaming for this session.
    #[error("Already streaming")]
    TurnInFlight,

    /// The relay answered with a non-success status.
    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body failed mid-stream.
    #[error("Stream read failed: {0}")]
    Transport(#[source] BoxError),

    /// The turn was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// The session task has stopped.
    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl ClientError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
