//! Pulse HTTP reporting API
//!
//! Axum-based HTTP server exposing aggregated agent metrics and live sessions
//! to dashboards. Runs alongside the Unix socket IPC intake.
//!
//! Each endpoint has a thin axum handler that delegates to a pure inner
//! function; the inner functions are tested directly.
//!
//! Endpoints:
//! - GET /health                            : store health
//! - GET /version                           : server version info
//! - GET /agents/:agent_id/metrics?hours=N  : hourly buckets, most recent first
//! - GET /agents/:agent_id/metrics/summary  : seven-day rollup
//! - GET /sessions/active                   : caller's active sessions
//! - GET /sessions/:session_id              : one of the caller's sessions
//!
//! The caller is identified by the `x-pulse-user-id` header, set by the
//! authenticating proxy in front of this service. Agent endpoints require the
//! caller to be the agent's owning developer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use pulse_core::{Engine, PulseConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::directory::AgentDirectory;
use crate::subsystems::reporting;

pub const USER_HEADER: &str = "x-pulse-user-id";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<Engine>,
    pub directory: Arc<dyn AgentDirectory>,
    pub config: PulseConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/agents/:agent_id/metrics", get(metrics_handler))
        .route("/agents/:agent_id/metrics/summary", get(summary_handler))
        .route("/sessions/active", get(active_sessions_handler))
        .route("/sessions/:session_id", get(session_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Pulse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn error_body(status: StatusCode, msg: &str) -> (StatusCode, serde_json::Value) {
    (
        status,
        serde_json::json!({
            "error": msg,
            "status": "error",
        }),
    )
}

/// Authenticated caller from request headers.
pub fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Allow the request only if `caller` owns `agent_id`.
pub async fn authorize_owner(
    directory: &dyn AgentDirectory,
    caller: Option<&str>,
    agent_id: &str,
) -> std::result::Result<(), (StatusCode, serde_json::Value)> {
    let caller = caller.ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "authentication required"))?;

    match directory.owner_of(agent_id).await {
        Ok(Some(owner)) if owner == caller => Ok(()),
        Ok(Some(_)) => Err(error_body(StatusCode::FORBIDDEN, "not the owner of this agent")),
        Ok(None) => Err(error_body(StatusCode::NOT_FOUND, "agent not found")),
        Err(e) => {
            tracing::error!(agent_id = %agent_id, error = %e, "Agent directory lookup failed");
            Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to verify agent ownership"))
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: pings the store and returns (status_code, json_body).
pub async fn health_inner(engine: &Engine, socket_path: &str) -> (StatusCode, serde_json::Value) {
    match engine.store().ping().await {
        Ok(backend) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": engine.store().name(),
                "backend": backend,
                "socket": socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "pulse/1",
    })
}

/// Inner metrics list: authorizes the caller and reads the hours window.
pub async fn metrics_inner(
    state: &HttpState,
    caller: Option<&str>,
    agent_id: &str,
    hours: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    if let Err(denied) = authorize_owner(state.directory.as_ref(), caller, agent_id).await {
        return denied;
    }

    let hours = reporting::parse_hours_window(hours, &state.config.metrics);
    match state.engine.metrics.get_metrics(agent_id, hours).await {
        Ok(buckets) => (
            StatusCode::OK,
            serde_json::json!({
                "agent_id": agent_id,
                "hours": hours,
                "count": buckets.len(),
                "metrics": buckets,
            }),
        ),
        Err(e) => {
            tracing::error!(agent_id = %agent_id, error = %e, "Metrics read failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve metrics")
        }
    }
}

/// Inner seven-day summary.
pub async fn summary_inner(
    state: &HttpState,
    caller: Option<&str>,
    agent_id: &str,
) -> (StatusCode, serde_json::Value) {
    if let Err(denied) = authorize_owner(state.directory.as_ref(), caller, agent_id).await {
        return denied;
    }

    match state.engine.metrics.get_metrics_for_last_7_days(agent_id).await {
        Ok(buckets) => {
            let summary = reporting::summarize(agent_id, &buckets);
            match serde_json::to_value(summary) {
                Ok(body) => (StatusCode::OK, body),
                Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }
        Err(e) => {
            tracing::error!(agent_id = %agent_id, error = %e, "Metrics read failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve metrics")
        }
    }
}

/// Inner active-session listing for the caller.
pub async fn active_sessions_inner(state: &HttpState, caller: Option<&str>) -> (StatusCode, serde_json::Value) {
    let Some(user_id) = caller else {
        return error_body(StatusCode::UNAUTHORIZED, "authentication required");
    };

    match state.engine.sessions.get_active_sessions(user_id).await {
        Ok(sessions) => (
            StatusCode::OK,
            serde_json::json!({
                "count": sessions.len(),
                "sessions": sessions,
            }),
        ),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Session listing failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve sessions")
        }
    }
}

/// Inner single-session lookup. Sessions belonging to someone else read as
/// not found.
pub async fn session_inner(
    state: &HttpState,
    caller: Option<&str>,
    session_id: &str,
) -> (StatusCode, serde_json::Value) {
    let Some(user_id) = caller else {
        return error_body(StatusCode::UNAUTHORIZED, "authentication required");
    };

    match state.engine.sessions.get_session(session_id).await {
        Ok(session) if session.user_id == user_id => match serde_json::to_value(session) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Ok(_) => error_body(StatusCode::NOT_FOUND, "session not found"),
        Err(e) if e.is_not_found() => error_body(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Session read failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve sessions")
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let socket_path = state.config.service.expanded_socket_path();
    let (status, body) = health_inner(&state.engine, &socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn metrics_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = caller_id(&headers);
    let hours = params.get("hours").map(String::as_str);
    let (status, body) = metrics_inner(&state, caller.as_deref(), &agent_id, hours).await;
    (status, Json(body))
}

pub async fn summary_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = caller_id(&headers);
    let (status, body) = summary_inner(&state, caller.as_deref(), &agent_id).await;
    (status, Json(body))
}

pub async fn active_sessions_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = caller_id(&headers);
    let (status, body) = active_sessions_inner(&state, caller.as_deref()).await;
    (status, Json(body))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let caller = caller_id(&headers);
    let (status, body) = session_inner(&state, caller.as_deref(), &session_id).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
