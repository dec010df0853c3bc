//! HTTP surfaces: the public gate, the admin gate, and the SSE stream
//! gateway. Handlers stay thin; every mutation goes through the
//! coordinator handle.

/// Admin REST surface and the authorization extractor.
pub mod admin;
/// Public REST surface.
pub mod public;
/// SSE stream gateway.
pub mod stream;

use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    core::store::StoreError,
    runtime::handle::{PileupHandle, RuntimeError},
};

/// Configuration for the HTTP server.
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8040`.
    pub bind_addr: String,
    /// Bearer token required on the admin surface. `None` rejects all
    /// admin requests.
    pub admin_token: Option<String>,
    /// Cadence of typed keepalive frames on the stream.
    pub keepalive_interval: Duration,
    /// Attach a permissive CORS layer (development setups where the UI is
    /// served from another origin).
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8040".to_string(),
            admin_token: None,
            keepalive_interval: Duration::from_secs(30),
            permissive_cors: false,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Coordinator handle.
    pub handle: PileupHandle,
    /// Expected admin bearer token.
    pub admin_token: Option<String>,
    /// Keepalive cadence for stream connections.
    pub keepalive_interval: Duration,
}

/// JSON error envelope returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// 401 response for a failed admin-authorization check.
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: "admin authorization required".to_string(),
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        let (status, code) = match &err {
            RuntimeError::Store(store) => match store {
                StoreError::InvalidFormat(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_format"),
                StoreError::DuplicateCallsign(_) => (StatusCode::CONFLICT, "duplicate_callsign"),
                StoreError::QueueFull { .. } => (StatusCode::CONFLICT, "queue_full"),
                StoreError::SystemInactive => (StatusCode::SERVICE_UNAVAILABLE, "system_inactive"),
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::ContactInProgress => (StatusCode::CONFLICT, "contact_in_progress"),
                StoreError::NothingActive => (StatusCode::CONFLICT, "nothing_active"),
            },
            RuntimeError::Persist(_) | RuntimeError::ChannelClosed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Builds the full application router.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/queue", post(public::register).get(public::queue))
        .route("/api/queue/{callsign}", delete(public::remove))
        .route("/api/current", get(public::current))
        .route("/api/worked", get(public::worked))
        .route("/api/settings", get(public::settings))
        .route("/api/state", get(public::state_snapshot))
        .route("/api/stream", get(stream::stream))
        .route("/health", get(public::health));

    let admin = Router::new()
        .route("/api/admin/promote", post(admin::promote_next))
        .route("/api/admin/complete", post(admin::complete_current))
        .route("/api/admin/direct-start", post(admin::direct_start))
        .route("/api/admin/queue", delete(admin::clear_queue))
        .route(
            "/api/admin/frequency",
            put(admin::set_frequency).delete(admin::clear_frequency),
        )
        .route(
            "/api/admin/split",
            put(admin::set_split).delete(admin::clear_split),
        )
        .route("/api/admin/active", put(admin::set_active))
        .route("/api/admin/integration", put(admin::set_integration))
        .route("/api/admin/worked", delete(admin::clear_worked))
        .route("/api/admin/worked/extend", post(admin::extend_worked));

    public.merge(admin).with_state(state)
}

/// Binds and serves until interrupted.
pub async fn serve(config: ServerConfig, handle: PileupHandle) -> anyhow::Result<()> {
    let state = AppState {
        handle,
        admin_token: config.admin_token,
        keepalive_interval: config.keepalive_interval,
    };

    let mut app = build_router(state);
    if config.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "pileup server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
