//! Decoding of the relay's normalized frame stream.

use std::sync::Arc;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use quill_core::wire::{self, ChatRequest, EventData};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, ClientError};
use crate::http::HttpClient;

/// Decode a relay response body into content fragments.
///
/// Ends after `data: [DONE]` or when the body closes. Once `cancel` fires the
/// stream yields [`ClientError::Cancelled`] and ends, whether the cancellation
/// is seen while waiting or surfaces as a read error.
pub fn decode_frames<S, E>(
    body: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, ClientError>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: Into<BoxError>,
{
    async_stream::stream! {
        let events = body.eventsource();
        futures::pin_mut!(events);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };
            let Some(next) = next else {
                yield Err(ClientError::Cancelled);
                break;
            };

            match next {
                Some(Ok(event)) => match wire::parse_frame_data(&event.data) {
                    Ok(EventData::Fragment(content)) => yield Ok(content),
                    Ok(EventData::Done) => {
                        debug!("Relay sent end-of-stream marker");
                        break;
                    }
                    Ok(EventData::Skip) => {}
                    Err(e) => warn!(error = %e, data = %event.data, "Skipping unparseable relay frame"),
                },
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        yield Err(ClientError::Cancelled);
                    } else {
                        yield Err(ClientError::Transport(stream_error(e)));
                    }
                    break;
                }
                None => break,
            }
        }
    }
}

fn stream_error<E: Into<BoxError>>(e: EventStreamError<E>) -> BoxError {
    match e {
        EventStreamError::Transport(e) => e.into(),
        EventStreamError::Utf8(e) => Box::new(e),
        EventStreamError::Parser(e) => format!("malformed relay stream: {e}").into(),
    }
}

/// Send one chat turn to the relay and stream back its fragments.
///
/// A non-success status is yielded as the only item, before any fragment.
pub fn turn_stream(
    http: Arc<HttpClient>,
    path: String,
    request: ChatRequest,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, ClientError>> + Send + 'static {
    async_stream::stream! {
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientError::Cancelled),
            sent = http.post_json(&path, &request) => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let frames = decode_frames(response.bytes_stream(), cancel);
        futures::pin_mut!(frames);
        while let Some(item) = frames.next().await {
            yield item;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(text: &str) -> String {
        format!("data: {{\"content\":\"{text}\"}}\n\n")
    }

    async fn decode(chunks: Vec<String>) -> Vec<Result<String, ClientError>> {
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
        );
        decode_frames(body, CancellationToken::new()).collect().await
    }

    #[tokio::test]
    async fn fragments_concatenate_across_read_sizes() {
        let fragments = ["Hel", "lo, ", "wörld ", "☃"];
        let script: String = fragments
            .iter()
            .map(|f| frame(f))
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();
        let bytes = script.as_bytes();

        for size in [1, 2, 5, 13, bytes.len()] {
            let chunks = bytes.chunks(size).map(Bytes::copy_from_slice);
            let body = futures::stream::iter(chunks.map(Ok::<_, std::io::Error>));
            let text: String = decode_frames(body, CancellationToken::new())
                .map(Result::unwrap)
                .collect()
                .await;
            assert_eq!(text, fragments.concat(), "read size {size}");
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let items = decode(vec![frame("a"), "data: <garbage>\n\n".into(), frame("b")]).await;
        let text: String = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn done_marker_stops_decoding() {
        let items = decode(vec![frame("a"), "data: [DONE]\n\n".into(), frame("late")]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "a");
    }

    #[tokio::test]
    async fn body_close_ends_stream() {
        let items = decode(vec![frame("a"), frame("b")]).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn transport_error_is_surfaced() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from(frame("a"))),
            Err(std::io::Error::other("reset")),
        ]);
        let items: Vec<_> = decode_frames(body, CancellationToken::new()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled_once() {
        let cancel = CancellationToken::new();
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(frame("a")))])
            .chain(futures::stream::pending());
        let stream = decode_frames(body, cancel.clone());
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(ClientError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn read_error_after_cancel_is_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let body = futures::stream::once(async move {
            trigger.cancel();
            Err::<Bytes, _>(std::io::Error::other("aborted"))
        });
        let items: Vec<_> = decode_frames(body, cancel).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ClientError::Cancelled)));
    }
}
