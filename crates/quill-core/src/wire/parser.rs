//! Parsers for the `data` field of upstream and normalized events.

use super::types::{CompletionChunk, DONE_SENTINEL, EventData, FramePayload};
use crate::error::{Error, Result};

/// Parse the data of one upstream completion event.
///
/// Returns `Err` only for a payload that is not valid JSON; callers log and
/// skip such events.
pub fn parse_upstream_data(data: &str) -> Result<EventData> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(EventData::Skip);
    }
    if data == DONE_SENTINEL {
        return Ok(EventData::Done);
    }
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| Error::Frame(format!("invalid upstream payload: {e}")))?;
    Ok(chunk
        .into_fragment()
        .map_or(EventData::Skip, EventData::Fragment))
}

/// Parse the data of one normalized relay event.
pub fn parse_frame_data(data: &str) -> Result<EventData> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(EventData::Skip);
    }
    if data == DONE_SENTINEL {
        return Ok(EventData::Done);
    }
    let frame: FramePayload = serde_json::from_str(data)
        .map_err(|e| Error::Frame(format!("invalid relay frame: {e}")))?;
    if frame.content.is_empty() {
        Ok(EventData::Skip)
    } else {
        Ok(EventData::Fragment(frame.content))
    }
}
