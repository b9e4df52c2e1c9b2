//! Server-sent event stream of the current job's output.
//!
//! Each relay event becomes one SSE event with `id` set to `<job id>:<sequence>`,
//! so a reconnecting browser resumes through `Last-Event-ID` and an id left
//! over from another job is never mistaken for a position in this one. The
//! stream ends with `event: end` / `data: CLOSE`.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use uuid::Uuid;

use synthgen_core::events::{END_OF_STREAM, REFRESH_FILES};
use synthgen_core::{Delivery, RelayEvent, RelayPayload, Subscription};

use crate::server::AppState;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

const LAST_EVENT_ID: &str = "last-event-id";

/// GET /stream
pub async fn stream_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let requested = last_event_id(&headers);
    let live = state.jobs.current().await.map(|job| {
        let job_id = job.id();
        let relay = job.relay();
        let after = requested
            .filter(|(id, _)| *id == job_id)
            .map(|(_, seq)| seq)
            .filter(|seq| *seq <= relay.last_sequence());
        tracing::debug!(%job_id, after = ?after, "stream subscriber attached");
        (job_id, relay.subscribe(after))
    });

    Sse::new(event_stream(live)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn last_event_id(headers: &HeaderMap) -> Option<(Uuid, u64)> {
    let value = headers.get(LAST_EVENT_ID)?.to_str().ok()?;
    let (job_id, sequence) = value.trim().split_once(':')?;
    Some((job_id.parse().ok()?, sequence.parse().ok()?))
}

fn event_id(job_id: Uuid, sequence: u64) -> String {
    format!("{job_id}:{sequence}")
}

enum StreamState {
    /// No job has run yet.
    Idle,
    Live(Uuid, Subscription),
    Done,
}

pub(crate) fn event_stream(
    live: Option<(Uuid, Subscription)>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = match live {
        Some((job_id, sub)) => StreamState::Live(job_id, sub),
        None => StreamState::Idle,
    };

    stream::unfold(initial, |state| async move {
        match state {
            StreamState::Idle => Some((Ok(end_event(None)), StreamState::Done)),
            StreamState::Live(job_id, mut sub) => {
                let delivery = sub.next().await?;
                Some((Ok(to_sse(job_id, delivery)), StreamState::Live(job_id, sub)))
            }
            StreamState::Done => None,
        }
    })
}

fn to_sse(job_id: Uuid, delivery: Delivery) -> Event {
    match delivery {
        Delivery::Gap { missed } => Event::default().event("gap").data(missed.to_string()),
        Delivery::Event(RelayEvent { sequence, payload }) => match payload {
            RelayPayload::Line(line) => Event::default()
                .id(event_id(job_id, sequence))
                .data(line.display_text()),
            RelayPayload::RefreshFiles => Event::default()
                .id(event_id(job_id, sequence))
                .data(REFRESH_FILES),
            RelayPayload::End { .. } => end_event(Some(event_id(job_id, sequence))),
        },
    }
}

fn end_event(id: Option<String>) -> Event {
    let event = Event::default().event("end").data(END_OF_STREAM);
    match id {
        Some(id) => event.id(id),
        None => event,
    }
}
