//! Quill Relay Server Library
//!
//! Core functionality for the Quill relay:
//! - Upstream completion client with cancellation forwarding
//! - Upstream event stream transcoding into normalized frames
//! - axum routes for the chat stream and health check

pub mod error;
pub mod routes;
pub mod transcode;
pub mod upstream;

pub use error::RelayError;
pub use routes::{AppState, build_router};
pub use upstream::UpstreamClient;
