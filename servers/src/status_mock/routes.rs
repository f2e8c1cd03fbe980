use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;

use crate::status_mock::feed::{items_for_tick, FeedSettings};

#[derive(Debug, Clone, Copy)]
pub struct MockState {
    pub feed: FeedSettings,
    pub interval: Duration,
}

pub fn router(state: MockState) -> Router {
    Router::new()
        .route("/api/monitors/{id}/stream", get(stream_handler))
        .route("/api/monitors/{id}/stream-url", get(stream_url_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn stream_handler(
    Path(id): Path<String>,
    State(state): State<MockState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(monitor = %id, "stream opened");
    let MockState { feed, interval } = state;

    let ticks = stream::unfold(1u64, move |tick| async move {
        if feed.should_drop(tick) {
            return None;
        }
        if tick > 1 {
            tokio::time::sleep(interval).await;
        }
        Some((tick, tick + 1))
    });

    let events = ticks.flat_map(move |tick| {
        let timestamp = Utc::now().to_rfc3339();
        let items = items_for_tick(&id, tick, &feed, &timestamp);
        tracing::debug!(monitor = %id, tick, events = items.len(), "publishing");
        stream::iter(
            items
                .into_iter()
                .map(|item| Ok::<_, Infallible>(Event::default().event(item.event).data(item.data))),
        )
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn stream_url_handler(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({ "url": format!("/api/monitors/{}/stream", id) }))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}
