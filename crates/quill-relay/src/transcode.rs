//! Upstream event stream to normalized frame transcoding.
//!
//! Data flow:
//! ```text
//! upstream body → eventsource → parse_upstream_data → Frame → client
//! ```

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use quill_core::wire::{self, EventData, Frame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BoxError, RelayError};

/// Decode an upstream completion body into normalized frames.
///
/// The returned stream:
/// - yields one [`Frame::Content`] per upstream fragment, in arrival order;
/// - yields [`Frame::Done`] and ends when upstream sends its sentinel;
/// - skips (and logs) events whose JSON payload does not parse;
/// - ends without an error once `cancel` fires, including when the body read
///   fails after cancellation;
/// - yields one [`RelayError::Transport`] and ends on any other read error.
///
/// The upstream body is owned by the stream, so every exit path (or dropping
/// the stream) releases the upstream connection.
pub fn transcode<S, E>(
    body: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Frame, RelayError>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: Into<BoxError>,
{
    async_stream::stream! {
        let events = body.eventsource();
        futures::pin_mut!(events);
        let mut forwarded: usize = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(forwarded, "Client aborted stream, closing upstream");
                    break;
                }
                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        info!(forwarded, "Upstream read interrupted by client abort");
                        break;
                    }
                    let e = stream_error(e);
                    error!(error = %e, forwarded, "Upstream stream read failed");
                    yield Err(RelayError::Transport(e));
                    break;
                }
                None => {
                    debug!(forwarded, "Upstream closed without end-of-stream sentinel");
                    break;
                }
            };

            match wire::parse_upstream_data(&event.data) {
                Ok(EventData::Fragment(content)) => {
                    forwarded += 1;
                    yield Ok(Frame::Content(content));
                }
                Ok(EventData::Done) => {
                    debug!(forwarded, "Upstream sent end-of-stream sentinel");
                    yield Ok(Frame::Done);
                    break;
                }
                Ok(EventData::Skip) => {}
                Err(e) => {
                    warn!(error = %e, data = %event.data, "Skipping unparseable upstream event");
                }
            }
        }
    }
}

fn stream_error<E: Into<BoxError>>(e: EventStreamError<E>) -> BoxError {
    match e {
        EventStreamError::Transport(e) => e.into(),
        EventStreamError::Utf8(e) => Box::new(e),
        EventStreamError::Parser(e) => format!("malformed event stream: {e}").into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn content_line(text: &str) -> String {
        let payload = serde_json::json!({
            "choices": [{ "index": 0, "delta": { "content": text } }]
        });
        format!("data: {payload}\n\n")
    }

    fn body(chunks: Vec<String>) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn run(chunks: Vec<String>) -> Vec<Frame> {
        transcode(body(chunks), CancellationToken::new())
            .map(Result::unwrap)
            .collect()
            .await
    }

    fn contents(frames: &[Frame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Content(c) => Some(c.as_str()),
                Frame::Done => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn forwards_fragments_in_order() {
        let frames = run(vec![
            content_line("Hel"),
            content_line("lo"),
            "data: [DONE]\n\n".into(),
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                Frame::Content("Hel".into()),
                Frame::Content("lo".into()),
                Frame::Done
            ]
        );
    }

    #[tokio::test]
    async fn fragments_survive_arbitrary_read_boundaries() {
        let fragments = ["The ", "quick ", "brown ", "fox ", "jumps ☃ ", "über"];
        let script: String = fragments
            .iter()
            .map(|f| content_line(f))
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();
        let bytes = script.as_bytes();

        for size in [1, 2, 3, 7, 16, 64, bytes.len()] {
            let chunks = bytes.chunks(size).map(|c| Bytes::copy_from_slice(c));
            let stream = futures::stream::iter(chunks.map(Ok::<_, std::io::Error>));
            let frames: Vec<Frame> = transcode(stream, CancellationToken::new())
                .map(Result::unwrap)
                .collect()
                .await;
            assert_eq!(contents(&frames), fragments.concat(), "read size {size}");
            assert_eq!(frames.last(), Some(&Frame::Done));
        }
    }

    #[tokio::test]
    async fn malformed_event_is_skipped() {
        let frames = run(vec![
            content_line("a"),
            "data: {garbage\n\n".into(),
            content_line("b"),
            "data: [DONE]\n\n".into(),
        ])
        .await;
        assert_eq!(contents(&frames), "ab");
    }

    #[tokio::test]
    async fn events_without_content_path_are_skipped() {
        let frames = run(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".into(),
            ": keep-alive\n\n".into(),
            content_line("x"),
            "data: {\"choices\":[]}\n\n".into(),
        ])
        .await;
        assert_eq!(frames, vec![Frame::Content("x".into())]);
    }

    #[tokio::test]
    async fn nothing_after_sentinel_is_forwarded() {
        let frames = run(vec![
            content_line("a"),
            "data: [DONE]\n\n".into(),
            content_line("late"),
        ])
        .await;
        assert_eq!(frames, vec![Frame::Content("a".into()), Frame::Done]);
    }

    #[tokio::test]
    async fn transport_error_is_reported() {
        let chunks = vec![
            Ok(Bytes::from(content_line("a"))),
            Err(std::io::Error::other("connection reset")),
        ];
        let items: Vec<Result<Frame, RelayError>> =
            transcode(futures::stream::iter(chunks), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(RelayError::Transport(_))));
    }

    #[tokio::test]
    async fn error_after_cancellation_closes_cleanly() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let chunks = futures::stream::iter(vec![Ok(Bytes::from(content_line("a")))])
            .chain(futures::stream::once(async move {
                trigger.cancel();
                Err(std::io::Error::other("aborted"))
            }));
        let items: Vec<Result<Frame, RelayError>> = transcode(chunks, cancel).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_a_stalled_upstream() {
        let cancel = CancellationToken::new();
        let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
            content_line("a"),
        ))])
        .chain(futures::stream::pending());
        let stream = transcode(chunks, cancel.clone());
        futures::pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Frame::Content("a".into()));

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_upstream_is_deterministic() {
        let script = vec![
            content_line("one "),
            "data: nope\n\n".into(),
            content_line("two"),
            "data: [DONE]\n\n".into(),
        ];
        let first = run(script.clone()).await;
        let second = run(script).await;
        assert_eq!(contents(&first), contents(&second));
        assert_eq!(contents(&first), "one two");
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_transport_error() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from(content_line("a"))),
            Ok(Bytes::from_static(b"data: \xff\xfe\n\n")),
        ];
        let items: Vec<Result<Frame, RelayError>> =
            transcode(futures::stream::iter(chunks), CancellationToken::new())
                .collect()
                .await;
        assert!(matches!(items[0], Ok(Frame::Content(ref c)) if c == "a"));
        assert!(matches!(items.last(), Some(Err(RelayError::Transport(_)))));
    }
}
