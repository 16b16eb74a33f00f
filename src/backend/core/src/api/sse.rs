//! `GET /events`: the live event stream as server-sent events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream, StreamExt};
use tracing::debug;

use super::AppState;
use crate::events::RecoveryEvent;
use crate::telemetry::RecoveryMetrics;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Each event is named after its kind and carries its payload as JSON.
fn to_sse(event: RecoveryEvent) -> Event {
    let data = serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.seq.to_string())
        .event(event.name.as_str())
        .data(data)
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let broadcaster = state.orchestrator.events();
    let live = broadcaster.stream();
    RecoveryMetrics::subscribers(broadcaster.subscriber_count());
    debug!(subscribers = broadcaster.subscriber_count(), "event stream subscriber connected");

    let snapshot = state.orchestrator.status().await;
    let initial = vec![
        RecoveryEvent::connected(),
        RecoveryEvent::state_change(snapshot.state, &snapshot.message),
        RecoveryEvent::stats_update(snapshot.stats),
    ];

    let stream = stream::iter(initial)
        .chain(live)
        .map(|event| Ok::<Event, Infallible>(to_sse(event)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive"))
}
