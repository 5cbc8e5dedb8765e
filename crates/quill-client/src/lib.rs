//! Quill Session Client Library
//!
//! Client side of a Quill conversation:
//! - HTTP layer with request and error interceptors
//! - Decoding of the relay's normalized frame stream
//! - Session state and the task that owns it

pub mod client;
pub mod error;
pub mod http;
pub mod session;
pub mod stream;

pub use client::{ChatOptions, SessionClient, SessionEvent, SessionHandle};
pub use error::ClientError;
pub use http::{HttpClient, HttpConfig};
pub use session::{CANCELLED_MARKER, Session, TurnOutcome, error_marker};
