use crate::control_api::{AppState, shutdown_requested};
use crate::ui_events::UiEvent;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{StreamExt, wrappers::WatchStream};

pub async fn notifier_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures_util::stream::Stream<Item = Result<Event, Infallible>>> {
    let snapshots = WatchStream::new(state.store.subscribe()).map(UiEvent::from);
    let statuses = WatchStream::new(state.connection.clone()).map(UiEvent::from);
    let updates = snapshots
        .merge(statuses)
        .filter_map(|event| match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.event_name()).data(json))),
            Err(_) => None,
        });
    let initial = tokio_stream::once(Ok(Event::default().event("connected").data("{}")));
    let stream = futures_util::StreamExt::take_until(
        initial.chain(updates),
        shutdown_requested(state.shutdown.clone()),
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
