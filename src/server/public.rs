//! Public REST surface: registration, queue reads, and state snapshots.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use crate::contact::{
    CurrentContact, QueueEntry, QueueView, StateSnapshot, SystemSettings, WorkedRecord,
};

use super::{ApiError, AppState};

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Callsign to queue, in any case or portable form.
    pub callsign: String,
}

/// `POST /api/queue` — joins the waiting queue.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<QueueEntry>), ApiError> {
    let entry = state.handle.register(req.callsign).await?;
    info!(callsign = %entry.callsign, "caller registered");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `DELETE /api/queue/{callsign}` — leaves the waiting queue.
pub async fn remove(
    State(state): State<AppState>,
    Path(callsign): Path<String>,
) -> Result<Json<QueueEntry>, ApiError> {
    let entry = state.handle.remove(callsign).await?;
    info!(callsign = %entry.callsign, "caller removed");
    Ok(Json(entry))
}

/// `GET /api/queue` — current queue with positions and capacity.
pub async fn queue(State(state): State<AppState>) -> Result<Json<QueueView>, ApiError> {
    Ok(Json(state.handle.queue().await?))
}

/// `GET /api/current` — the active contact, if any.
pub async fn current(
    State(state): State<AppState>,
) -> Result<Json<Option<CurrentContact>>, ApiError> {
    Ok(Json(state.handle.current().await?))
}

/// `GET /api/worked` — live worked records.
pub async fn worked(State(state): State<AppState>) -> Result<Json<Vec<WorkedRecord>>, ApiError> {
    Ok(Json(state.handle.worked().await?))
}

/// `GET /api/settings` — operational settings.
pub async fn settings(State(state): State<AppState>) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(state.handle.settings().await?))
}

/// `GET /api/state` — consistent snapshot of all aggregates, for initial
/// page loads and stream reconnects.
pub async fn state_snapshot(
    State(state): State<AppState>,
) -> Result<Json<StateSnapshot>, ApiError> {
    Ok(Json(state.handle.snapshot().await?))
}

/// `GET /health` — liveness probe.
pub async fn health() -> &'static str {
    "ok"
}
