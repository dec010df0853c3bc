//! Admin REST surface, gated by a bearer-token authorization check.

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{header, request::Parts},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    contact::{ChannelMeta, CurrentContact, SystemSettings, WorkedRecord},
    core::store::DirectStartOutcome,
};

use super::{ApiError, AppState};

/// Extractor that rejects requests lacking the configured admin token.
///
/// A deployment with no token configured rejects every admin request
/// rather than running the surface open.
pub struct RequireAdmin;

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            warn!("admin request rejected: no admin token configured");
            return Err(ApiError::unauthorized());
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => Ok(RequireAdmin),
            _ => {
                warn!("admin request rejected: bad credentials");
                Err(ApiError::unauthorized())
            }
        }
    }
}

/// Direct-start request body, as reported by a logging-software bridge.
#[derive(Debug, Deserialize)]
pub struct DirectStartRequest {
    /// Callsign already being worked on the air.
    pub callsign: String,
    /// Optional frequency display tag.
    pub frequency_display: Option<String>,
    /// Optional mode tag.
    pub mode: Option<String>,
}

/// Active-flag request body.
#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    /// New active value.
    pub active: bool,
}

/// Integration-toggle request body.
#[derive(Debug, Deserialize)]
pub struct SetIntegrationRequest {
    /// New integration value.
    pub enabled: bool,
}

/// Frequency request body.
#[derive(Debug, Deserialize)]
pub struct SetFrequencyRequest {
    /// New frequency display string.
    pub frequency_display: String,
}

/// Split request body.
#[derive(Debug, Deserialize)]
pub struct SetSplitRequest {
    /// New split display string.
    pub split_display: String,
}

/// Retention-extension request body.
#[derive(Debug, Deserialize)]
pub struct ExtendWorkedRequest {
    /// Minutes added to each live worked record's horizon.
    pub extra_minutes: u64,
}

/// `POST /api/admin/promote` — moves the queue head into the active slot.
pub async fn promote_next(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<Option<CurrentContact>>, ApiError> {
    let contact = state.handle.promote_next().await?;
    if let Some(contact) = &contact {
        info!(callsign = %contact.callsign, "promoted next caller");
    }
    Ok(Json(contact))
}

/// `POST /api/admin/complete` — archives the active contact.
pub async fn complete_current(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<WorkedRecord>, ApiError> {
    let record = state.handle.complete_current().await?;
    info!(callsign = %record.callsign, "contact completed");
    Ok(Json(record))
}

/// `POST /api/admin/direct-start` — installs a bridge-reported contact.
pub async fn direct_start(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<DirectStartRequest>,
) -> Result<Json<DirectStartOutcome>, ApiError> {
    let channel_meta = if req.frequency_display.is_some() || req.mode.is_some() {
        Some(ChannelMeta {
            frequency_display: req.frequency_display,
            mode: req.mode,
        })
    } else {
        None
    };

    let outcome = state.handle.direct_start(req.callsign, channel_meta).await?;
    info!(
        callsign = %outcome.contact.callsign,
        was_in_queue = outcome.was_in_queue,
        "direct start installed"
    );
    Ok(Json(outcome))
}

/// `DELETE /api/admin/queue` — empties the queue.
pub async fn clear_queue(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<usize>, ApiError> {
    let count = state.handle.clear_queue().await?;
    info!(count, "queue cleared");
    Ok(Json(count))
}

/// `PUT /api/admin/frequency` — sets the frequency display string.
pub async fn set_frequency(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<SetFrequencyRequest>,
) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(
        state
            .handle
            .set_frequency(Some(req.frequency_display))
            .await?,
    ))
}

/// `DELETE /api/admin/frequency` — clears the frequency display string.
pub async fn clear_frequency(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(state.handle.set_frequency(None).await?))
}

/// `PUT /api/admin/split` — sets the split display string.
pub async fn set_split(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<SetSplitRequest>,
) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(state.handle.set_split(Some(req.split_display)).await?))
}

/// `DELETE /api/admin/split` — clears the split display string.
pub async fn clear_split(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(state.handle.set_split(None).await?))
}

/// `PUT /api/admin/active` — flips the active flag (hard reset on edge).
pub async fn set_active(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<SystemSettings>, ApiError> {
    let settings = state.handle.set_active(req.active).await?;
    info!(active = settings.active, "active flag set");
    Ok(Json(settings))
}

/// `PUT /api/admin/integration` — toggles the bridge integration.
pub async fn set_integration(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<SetIntegrationRequest>,
) -> Result<Json<SystemSettings>, ApiError> {
    Ok(Json(state.handle.set_integration(req.enabled).await?))
}

/// `DELETE /api/admin/worked` — empties the worked history.
pub async fn clear_worked(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<usize>, ApiError> {
    let count = state.handle.clear_worked().await?;
    info!(count, "worked history cleared");
    Ok(Json(count))
}

/// `POST /api/admin/worked/extend` — bulk-extends worked retention.
pub async fn extend_worked(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(req): Json<ExtendWorkedRequest>,
) -> Result<Json<usize>, ApiError> {
    let extra_ms = req.extra_minutes.saturating_mul(60_000);
    let count = state.handle.extend_worked(extra_ms).await?;
    info!(count, extra_minutes = req.extra_minutes, "worked retention extended");
    Ok(Json(count))
}
