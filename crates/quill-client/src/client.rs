//! Session task and its handle.
//!
//! One tokio task owns the [`Session`] and drives the active turn's fragment
//! stream. Callers talk to it through a cloneable [`SessionHandle`] and
//! observe progress as [`SessionEvent`]s, delivered in order on one channel.
//! The event channel is unbounded: the task never waits on a slow reader,
//! so commands are served even while nobody drains events.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use quill_core::wire::ChatRequest;
use quill_core::{Message, MessageId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::http::HttpClient;
use crate::session::{Session, TurnOutcome};
use crate::stream::turn_stream;

const COMMAND_BUFFER: usize = 32;

type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Lifecycle notification from the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TurnStarted { user: Message, assistant: Message },
    /// The in-flight assistant message received a fragment.
    MessageUpdated(Message),
    /// `message` is `None` when the session was cleared mid-turn.
    TurnEnded {
        message: Option<Message>,
        outcome: TurnOutcome,
    },
    Error {
        status: Option<u16>,
        message: String,
    },
    Cleared,
}

/// Per-turn request parameters.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Chat endpoint path on the relay.
    pub path: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            path: "/api/chat".to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

enum Command {
    BeginTurn {
        text: String,
        reply: oneshot::Sender<Result<MessageId, ClientError>>,
    },
    CancelTurn {
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
}

/// Cloneable handle to a running session task.
///
/// The task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Start a turn. Returns the id of the new assistant message.
    ///
    /// Fails with [`ClientError::TurnInFlight`] while another turn streams.
    pub async fn begin_turn(&self, text: impl Into<String>) -> Result<MessageId, ClientError> {
        let text = text.into();
        self.request(|reply| Command::BeginTurn { text, reply })
            .await?
    }

    /// Cancel the in-flight turn. Returns `false` if none was running.
    pub async fn cancel_turn(&self) -> Result<bool, ClientError> {
        self.request(|reply| Command::CancelTurn { reply }).await
    }

    /// Discard all messages. Does not cancel an in-flight turn.
    pub async fn clear_session(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Snapshot of the message sequence.
    pub async fn messages(&self) -> Result<Vec<Message>, ClientError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }
}

/// Spawns session tasks.
pub struct SessionClient;

impl SessionClient {
    /// Spawn a session task on the current runtime.
    pub fn spawn(
        http: HttpClient,
        options: ChatOptions,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            session: Session::new(),
            http: Arc::new(http),
            options,
            events: event_tx,
            active: None,
        };
        tokio::spawn(task.run(command_rx));

        (
            SessionHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }
}

enum Step {
    Command(Option<Command>),
    Fragment(Option<Result<String, ClientError>>),
}

struct SessionTask {
    session: Session,
    http: Arc<HttpClient>,
    options: ChatOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Fragment stream of the in-flight turn.
    active: Option<FragmentStream>,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Session task started");
        loop {
            let step = tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                item = next_fragment(&mut self.active) => Step::Fragment(item),
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => break,
                Step::Fragment(item) => self.handle_fragment(item),
            }
        }

        if self.session.cancel_turn() {
            self.active = None;
            self.finish(TurnOutcome::Cancelled);
        }
        debug!("Session task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::BeginTurn { text, reply } => {
                let result = self.begin_turn(text);
                let _ = reply.send(result);
            }
            Command::CancelTurn { reply } => {
                let cancelled = self.session.cancel_turn();
                if cancelled {
                    info!("Turn cancelled");
                    // Dropping the stream closes the relay connection.
                    self.active = None;
                    self.finish(TurnOutcome::Cancelled);
                }
                let _ = reply.send(cancelled);
            }
            Command::Clear { reply } => {
                if self.session.is_streaming() {
                    debug!("Clearing session while a turn is in flight");
                }
                self.session.clear();
                self.emit(SessionEvent::Cleared);
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.messages().to_vec());
            }
        }
    }

    fn begin_turn(&mut self, text: String) -> Result<MessageId, ClientError> {
        let start = self.session.begin_turn(text)?;
        let assistant_id = start.assistant.id;

        let request = ChatRequest {
            messages: start.history,
            model: self.options.model.clone(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        info!(messages = request.messages.len(), "Turn started");
        self.active = Some(Box::pin(turn_stream(
            Arc::clone(&self.http),
            self.options.path.clone(),
            request,
            start.cancel,
        )));

        self.emit(SessionEvent::TurnStarted {
            user: start.user,
            assistant: start.assistant,
        });
        Ok(assistant_id)
    }

    fn handle_fragment(&mut self, item: Option<Result<String, ClientError>>) {
        match item {
            Some(Ok(fragment)) => {
                if let Some(message) = self.session.append_fragment(&fragment) {
                    let message = message.clone();
                    self.emit(SessionEvent::MessageUpdated(message));
                }
            }
            Some(Err(ClientError::Cancelled)) => {
                self.active = None;
                self.finish(TurnOutcome::Cancelled);
            }
            Some(Err(e)) => {
                self.active = None;
                warn!(error = %e, "Turn failed");
                self.emit(SessionEvent::Error {
                    status: e.status(),
                    message: e.to_string(),
                });
                self.finish(TurnOutcome::Failed(e.to_string()));
            }
            None => {
                self.active = None;
                self.finish(TurnOutcome::Completed);
            }
        }
    }

    fn finish(&mut self, outcome: TurnOutcome) {
        let message = self.session.end_turn(&outcome);
        debug!(?outcome, "Turn ended");
        self.emit(SessionEvent::TurnEnded { message, outcome });
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Next item of the active stream; pending forever when idle.
async fn next_fragment(active: &mut Option<FragmentStream>) -> Option<Result<String, ClientError>> {
    match active {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
