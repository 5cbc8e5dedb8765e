//! Wire formats for the chat relay.
//!
//! Two server-sent event streams flow through the relay:
//! - the upstream completion stream (`data: <json>` events, `data: [DONE]` at the end)
//! - the normalized stream sent to clients (`data: {"content": ...}` frames)
//!
//! Event framing is handled by `eventsource-stream` at the edges; this module
//! decodes the `data` field of each event. Decoding is tolerant: a payload that
//! fails to parse is reported to the caller, which logs and skips it.

mod parser;
mod types;

pub use parser::{parse_frame_data, parse_upstream_data};
pub use types::*;
