//! Request and event types exchanged with the relay and the upstream API.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Role;

/// Tag that opens every content-bearing event line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload literal marking the end of an event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Role/content pair as sent to the relay and forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Older web clients send this field as `type`.
    #[serde(alias = "type")]
    pub role: Role,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Body of the upstream completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One decoded upstream event payload.
///
/// Only the path `choices[0].delta.content` is read; every level is optional
/// and a missing level simply means the line carries no fragment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionChunk {
    /// Text fragment of the first choice, if any and non-empty.
    pub fn into_fragment(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
    }
}

/// JSON envelope of one normalized frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePayload {
    #[serde(default)]
    pub content: String,
}

/// One frame of the normalized stream sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Content(String),
    /// Upstream signalled end-of-stream.
    Done,
}

impl Frame {
    /// Value of the frame's `data` field.
    pub fn data(&self) -> Result<String> {
        match self {
            Self::Content(content) => Ok(serde_json::to_string(&FramePayload {
                content: content.clone(),
            })?),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }

    /// Full frame as written to the wire: `data: <payload>\n\n`.
    pub fn encode(&self) -> Result<String> {
        Ok(format!("{DATA_PREFIX}{}\n\n", self.data()?))
    }
}

/// The decoded `data` field of one event from either stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    Fragment(String),
    Done,
    /// Empty payload, or a payload without content.
    Skip,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_accepts_type_alias() {
        let json = r#"{"messages":[{"type":"user","content":"hi"}]}"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.messages[0].role, Role::User);
        assert!(req.model.is_none());
    }

    #[test]
    fn chat_request_rejects_non_list_messages() {
        let json = r#"{"messages":"hello"}"#;
        assert!(serde_json::from_str::<ChatRequest>(json).is_err());
    }

    #[test]
    fn chunk_without_delta_has_no_fragment() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"choices":[{"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(chunk.into_fragment(), None);
    }

    #[test]
    fn chunk_with_empty_content_has_no_fragment() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap();
        assert_eq!(chunk.into_fragment(), None);
    }

    #[test]
    fn frame_encoding() {
        assert_eq!(
            Frame::Content("a\"b".into()).encode().unwrap(),
            "data: {\"content\":\"a\\\"b\"}\n\n"
        );
        assert_eq!(Frame::Done.encode().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn completion_request_shape() {
        let req = CompletionRequest {
            model: "deepseek-chat".into(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".into(),
            }],
            stream: true,
            temperature: 0.5,
            max_tokens: 10,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 10);
    }
}
