//! SSE stream gateway.
//!
//! Each connection owns one bus subscription and one task. On open, the
//! client receives a `connected` frame carrying server time; after that,
//! committed change events fan out in publish order, interleaved with
//! per-connection `keepalive` frames. Keepalives are generated here rather
//! than published through the bus, so they can never crowd state events out
//! of a subscriber's buffer. A connection that falls behind the bus buffer
//! is closed instead of slowing the publisher; the dropped stream state
//! releases the subscription, and a reconnecting client resynchronizes via
//! the snapshot endpoint.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::{Stream, stream};
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, Interval},
};
use tracing::{debug, warn};

use crate::{
    runtime::events::PileupEvent,
    types::{TimestampMs, now_ms},
};

use super::AppState;

/// Wire envelope for every stream frame.
#[derive(Debug, Serialize)]
struct StreamFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    data: serde_json::Value,
    timestamp: TimestampMs,
}

struct StreamState {
    rx: broadcast::Receiver<PileupEvent>,
    ticker: Interval,
    opened: bool,
}

/// `GET /api/stream` — subscribe-only event stream.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let period = state.keepalive_interval;
    let st = StreamState {
        rx: state.handle.subscribe(),
        ticker: tokio::time::interval_at(Instant::now() + period, period),
        opened: false,
    };
    debug!("stream subscriber connected");

    let stream = stream::unfold(st, |mut st| async move {
        if !st.opened {
            st.opened = true;
            let connected = frame("connected", json!({ "server_time_ms": now_ms() }));
            return Some((connected, st));
        }

        loop {
            tokio::select! {
                evt = st.rx.recv() => match evt {
                    Ok(evt) => {
                        if let Some(out) = event_frame(&evt) {
                            return Some((out, st));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "stream subscriber lagged behind the bus, closing");
                        return None;
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = st.ticker.tick() => {
                    return Some((frame("keepalive", json!({})), st));
                }
            }
        }
    });

    Sse::new(stream)
}

fn frame(kind: &'static str, data: serde_json::Value) -> Result<Event, axum::Error> {
    let frame = StreamFrame {
        kind,
        data,
        timestamp: now_ms(),
    };
    Event::default().event(kind).json_data(&frame)
}

fn frame_of<T: Serialize>(kind: &'static str, value: &T) -> Result<Event, axum::Error> {
    match serde_json::to_value(value) {
        Ok(data) => frame(kind, data),
        Err(err) => Err(axum::Error::new(err)),
    }
}

/// Serializes a bus event into its wire frame; internal events yield `None`.
fn event_frame(evt: &PileupEvent) -> Option<Result<Event, axum::Error>> {
    match evt {
        PileupEvent::QueueUpdate { queue } => Some(frame_of("queue_update", queue)),
        PileupEvent::CurrentQso { contact } => Some(frame_of("current_qso", contact)),
        PileupEvent::SystemStatus { settings } => Some(frame_of("system_status", settings)),
        PileupEvent::FrequencyUpdate { frequency_display } => Some(frame(
            "frequency_update",
            json!({ "frequency_display": frequency_display }),
        )),
        PileupEvent::SplitUpdate { split_display } => Some(frame(
            "split_update",
            json!({ "split_display": split_display }),
        )),
        PileupEvent::WorkedUpdate { records } => Some(frame_of("worked_callers_update", records)),
        PileupEvent::DurableUpTo { .. } => None,
    }
}
