//! SSE framing for the standalone event stream and streamed exchanges.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use tether_session::{EventEnvelope, StreamGuard};

/// One log entry as one SSE frame. The log's event id rides the SSE `id`
/// field, which is what a reconnecting client echoes in `Last-Event-ID`.
pub(crate) fn to_sse_event(envelope: &EventEnvelope) -> Event {
    Event::default()
        .id(envelope.event_id.to_string())
        .event("message")
        .data(envelope.payload.to_string())
}

/// Replayed entries first, then the live feed until the session closes. The
/// guard keeps the session's single-stream slot held for the body's lifetime.
pub(crate) fn standalone_stream(
    guard: StreamGuard,
    replay: Vec<EventEnvelope>,
    rx: broadcast::Receiver<EventEnvelope>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        for envelope in &replay {
            yield Ok(to_sse_event(envelope));
        }
        let mut live = BroadcastStream::new(rx);
        while let Some(item) = live.next().await {
            match item {
                Ok(envelope) => yield Ok(to_sse_event(&envelope)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    // The client can recover the gap by reconnecting with
                    // Last-Event-ID; a silently lossy stream cannot.
                    tracing::warn!(skipped, "event stream lagged, closing for replay");
                    break;
                }
            }
        }
    }
}

/// A finite event-stream response carrying one exchange's response messages.
pub(crate) fn exchange_response(events: Vec<EventEnvelope>) -> Response {
    let stream = futures::stream::iter(
        events
            .into_iter()
            .map(|envelope| Ok::<_, Infallible>(to_sse_event(&envelope))),
    );
    Sse::new(stream).into_response()
}
