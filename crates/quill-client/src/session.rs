//! Conversation state for one session.
//!
//! [`Session`] is plain data owned by a single task; it never performs I/O.

use quill_core::wire::ChatMessage;
use quill_core::{Message, MessageId};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;

/// Appended to an assistant message whose turn was cancelled.
pub const CANCELLED_MARKER: &str = "\n[Conversation cancelled]";

/// Appended to an assistant message whose turn failed.
pub fn error_marker(description: &str) -> String {
    format!("\n[Error: {description}]")
}

/// Terminal state of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The relay signalled end-of-stream or closed the body.
    Completed,
    Cancelled,
    /// Network or relay error, with its description.
    Failed(String),
}

impl TurnOutcome {
    fn marker(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Cancelled => Some(CANCELLED_MARKER.to_string()),
            Self::Failed(description) => Some(error_marker(description)),
        }
    }
}

#[derive(Debug)]
struct ActiveTurn {
    assistant_id: MessageId,
    cancel: CancellationToken,
}

/// What a caller needs to drive a freshly started turn.
#[derive(Debug)]
pub struct TurnStart {
    pub user: Message,
    pub assistant: Message,
    /// Completed messages to send to the relay, ending with `user`.
    pub history: Vec<ChatMessage>,
    pub cancel: CancellationToken,
}

/// Ordered message sequence plus the in-flight turn, if any.
#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<Message>,
    turn: Option<ActiveTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub const fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    /// Id of the assistant message being streamed.
    pub fn active_message(&self) -> Option<MessageId> {
        self.turn.as_ref().map(|turn| turn.assistant_id)
    }

    /// Start a turn: append the user message and an empty streaming
    /// assistant message.
    ///
    /// Fails without touching the session if a turn is already in flight.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> Result<TurnStart, ClientError> {
        if self.turn.is_some() {
            return Err(ClientError::TurnInFlight);
        }

        let user = Message::user(text);
        let assistant = Message::assistant_placeholder();
        self.messages.push(user.clone());
        let history = self.history();
        self.messages.push(assistant.clone());

        let cancel = CancellationToken::new();
        self.turn = Some(ActiveTurn {
            assistant_id: assistant.id,
            cancel: cancel.clone(),
        });

        Ok(TurnStart {
            user,
            assistant,
            history,
            cancel,
        })
    }

    /// Messages to send to the relay; the streaming placeholder is left out.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !m.streaming)
            .map(Message::to_wire)
            .collect()
    }

    /// Append a fragment to the in-flight assistant message.
    ///
    /// Returns the updated message, or `None` when no turn is active or its
    /// message was cleared from the session.
    pub fn append_fragment(&mut self, fragment: &str) -> Option<&Message> {
        let id = self.active_message()?;
        let Some(message) = self.find_mut(id) else {
            debug!(id = %id, "Dropping fragment for a message no longer in the session");
            return None;
        };
        message.append(fragment);
        Some(&*message)
    }

    /// Signal the live cancellation token. Returns `false` when idle.
    pub fn cancel_turn(&self) -> bool {
        match &self.turn {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Finish the in-flight turn.
    ///
    /// Appends the outcome's marker, clears `streaming`, re-stamps the
    /// message and releases the token. Only the first call per turn has any
    /// effect, so a marker is never appended twice.
    pub fn end_turn(&mut self, outcome: &TurnOutcome) -> Option<Message> {
        let turn = self.turn.take()?;
        let message = self.find_mut(turn.assistant_id)?;
        if let Some(marker) = outcome.marker() {
            message.content.push_str(&marker);
        }
        message.streaming = false;
        message.touch();
        Some(message.clone())
    }

    /// Discard every message. An in-flight turn keeps running detached.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quill_core::Role;

    #[test]
    fn begin_turn_appends_user_and_placeholder() {
        let mut session = Session::new();
        let start = session.begin_turn("hi").unwrap();

        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);
        assert_eq!(session.messages()[1].id, start.assistant.id);
        assert!(session.messages()[1].streaming);
        assert!(session.is_streaming());
        assert_eq!(start.history.len(), 1);
        assert_eq!(start.history[0].content, "hi");
    }

    #[test]
    fn second_turn_is_rejected_without_mutation() {
        let mut session = Session::new();
        session.begin_turn("one").unwrap();
        session.append_fragment("partial");
        let before = session.messages().to_vec();

        assert!(matches!(
            session.begin_turn("two"),
            Err(ClientError::TurnInFlight)
        ));
        assert_eq!(session.messages(), before.as_slice());
    }

    #[test]
    fn fragments_update_the_same_message() {
        let mut session = Session::new();
        let start = session.begin_turn("q").unwrap();
        for fragment in ["a", "b", "c"] {
            let msg = session.append_fragment(fragment).unwrap();
            assert_eq!(msg.id, start.assistant.id);
        }
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "abc");
    }

    #[test]
    fn completed_turn_has_no_marker() {
        let mut session = Session::new();
        session.begin_turn("q").unwrap();
        session.append_fragment("answer");
        let msg = session.end_turn(&TurnOutcome::Completed).unwrap();
        assert_eq!(msg.content, "answer");
        assert!(!msg.streaming);
        assert!(!session.is_streaming());
    }

    #[test]
    fn cancel_marker_is_appended_once() {
        let mut session = Session::new();
        let start = session.begin_turn("q").unwrap();
        session.append_fragment("so far");

        assert!(session.cancel_turn());
        assert!(start.cancel.is_cancelled());
        let msg = session.end_turn(&TurnOutcome::Cancelled).unwrap();
        assert!(session.end_turn(&TurnOutcome::Failed("late".into())).is_none());

        assert_eq!(msg.content, format!("so far{CANCELLED_MARKER}"));
        assert_eq!(session.messages()[1].content, msg.content);
        assert!(!session.messages()[1].streaming);
    }

    #[test]
    fn error_marker_differs_from_cancel_marker() {
        let mut session = Session::new();
        session.begin_turn("q").unwrap();
        let msg = session
            .end_turn(&TurnOutcome::Failed("HTTP error! status: 500".into()))
            .unwrap();
        assert_eq!(msg.content, "\n[Error: HTTP error! status: 500]");
        assert_ne!(error_marker("x"), CANCELLED_MARKER);
    }

    #[test]
    fn cancel_when_idle_is_noop() {
        let session = Session::new();
        assert!(!session.cancel_turn());
    }

    #[test]
    fn history_excludes_streaming_message() {
        let mut session = Session::new();
        session.begin_turn("first").unwrap();
        session.append_fragment("reply");
        session.end_turn(&TurnOutcome::Completed);

        let start = session.begin_turn("second").unwrap();
        let roles: Vec<Role> = start.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(session.history().len(), 3);
    }

    #[test]
    fn clear_detaches_in_flight_turn() {
        let mut session = Session::new();
        session.begin_turn("q").unwrap();
        session.clear();

        assert!(session.messages().is_empty());
        assert!(session.append_fragment("lost").is_none());
        assert!(session.is_streaming());
        assert!(session.end_turn(&TurnOutcome::Completed).is_none());
        assert!(!session.is_streaming());
    }
}
