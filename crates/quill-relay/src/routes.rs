use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{Stream, StreamExt};
use quill_core::wire::{ChatRequest, Frame};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::transcode::transcode;
use crate::upstream::UpstreamClient;

/// Server-sent event stream for one relayed turn.
type EventStream = Pin<Box<dyn Stream<Item = Result<Event, RelayError>> + Send>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    /// Server-wide shutdown signal; every request token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream: Arc::new(upstream),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health`
async fn health() -> &'static str {
    "ok"
}

/// Parse and validate the inbound body.
fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| RelayError::InvalidMessages(e.to_string()))?;
    if request.messages.is_empty() {
        return Err(RelayError::InvalidMessages("message list is empty".into()));
    }
    Ok(request)
}

/// `POST /api/chat`: relay one conversation turn as a server-sent event stream.
async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    match open_turn(&state, &body).await {
        Ok(stream) => Sse::new(stream).into_response(),
        Err(e) => {
            if matches!(e, RelayError::Cancelled) {
                info!("Request aborted by client before streaming");
            } else {
                warn!(error = %e, status = e.status().as_u16(), "Chat request rejected");
            }
            e.into_response()
        }
    }
}

/// Validate, open the upstream stream, and wire it to a frame stream.
///
/// The request token is cancelled when the returned stream is dropped (client
/// disconnect) or when the server shuts down; both paths close the upstream
/// connection.
async fn open_turn(state: &AppState, body: &[u8]) -> Result<EventStream, RelayError> {
    state.upstream.ensure_configured()?;
    let request = parse_chat_request(body)?;

    let cancel = state.shutdown.child_token();
    let guard = cancel.clone().drop_guard();

    let completion = state.upstream.completion_request(request);
    info!(
        model = %completion.model,
        messages = completion.messages.len(),
        "Relaying chat turn"
    );
    let response = state.upstream.open(&completion, &cancel).await?;

    let frames = transcode(response.bytes_stream(), cancel);
    Ok(Box::pin(async_stream::stream! {
        let _guard = guard;
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            yield frame.and_then(|frame| to_event(&frame));
        }
    }))
}

fn to_event(frame: &Frame) -> Result<Event, RelayError> {
    Ok(Event::default().data(frame.data()?))
}
