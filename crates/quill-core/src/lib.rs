//! `Quill` Core Library
//!
//! Shared functionality for `Quill` components:
//! - Conversation message model
//! - Event payloads of the upstream and normalized streams
//! - Configuration resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod tracing_init;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Message, MessageId, Role};
