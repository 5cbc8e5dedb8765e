//! Conversation message model.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::ChatMessage;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Stable message identifier.
///
/// Backed by a UUIDv7 (millisecond timestamp plus random bits), so ids are
/// unique for the lifetime of a session and sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Creation time for user messages, last update for assistant messages.
    pub timestamp: DateTime<Utc>,
    /// True while fragments are still being appended.
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    /// A completed user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    /// An empty assistant message that is about to receive fragments.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            streaming: true,
        }
    }

    /// Append a fragment and re-stamp the message.
    pub fn append(&mut self, fragment: &str) {
        self.content.push_str(fragment);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Timestamp in local time as `YYYY-MM-DD HH:MM:SS`.
    pub fn display_timestamp(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Role/content pair sent over the wire.
    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}
