//! SSE event stream
//!
//! Streams domain events to the caller, filtered by tenancy: institution
//! users see their own institution's events, regulator and platform
//! roles see everything. Heartbeat comments keep idle connections alive.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    Extension,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use yiba_common::api::types::AuthUser;

use crate::AppState;

/// GET /api/events
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected (user {})", auth.user_id);
    let mut rx = state.events.subscribe();
    let scope = auth.institution_id;

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            // Institution users only see their own events
                            if let Some(own) = scope {
                                if event.institution_id() != Some(own) {
                                    continue;
                                }
                            }
                            match serde_json::to_string(&event) {
                                Ok(data) => yield Ok(Event::default().event("YibaEvent").data(data)),
                                Err(e) => warn!("Failed to serialize event: {}", e),
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("SSE client lagged, {} events dropped", missed);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
