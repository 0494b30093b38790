//! Somnus HTTP API
//!
//! Runs alongside the event socket for gateways that prefer webhooks, and
//! for operators.
//!
//! Each endpoint is a thin axum handler over an inner function that tests
//! call directly.
//!
//! Endpoints:
//! - GET  /health:   store status
//! - GET  /version:  server version info
//! - POST /events:   deliver one `BotEvent` (JSON)
//! - GET  /sessions: session export, optionally `?channel_id=..`

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use somnus_core::BotEvent;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router;
use crate::state::BotState;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<BotState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/events", post(events_handler))
        .route("/sessions", get(sessions_handler))
        .with_state(state)
}

/// Serve on `http.host:http.port` until the shutdown signal fires.
pub async fn start_http_server(
    state: Arc<BotState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Somnus HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize, Default)]
pub struct SessionsQuery {
    pub channel_id: Option<String>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(state: &BotState) -> (StatusCode, serde_json::Value) {
    let sessions = state.store.all_sessions().await;
    let pending = sessions.iter().filter(|s| s.pending).count();
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "datafile": state.store.path().display().to_string(),
            "sessions": sessions.len(),
            "pending": pending,
            "notifier": state.notifier.name(),
        }),
    )
}

pub async fn events_inner(state: &BotState, event: BotEvent) -> (StatusCode, serde_json::Value) {
    let ack = router::handle_event(state, event).await;
    let status = if ack.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        serde_json::to_value(&ack).unwrap_or_else(|_| serde_json::json!({ "status": "error" })),
    )
}

pub async fn sessions_inner(
    state: &BotState,
    query: SessionsQuery,
) -> (StatusCode, serde_json::Value) {
    let sessions = match query.channel_id {
        Some(channel_id) => state.store.sessions_for_channel(&channel_id).await,
        None => state.store.all_sessions().await,
    };
    match serde_json::to_value(&sessions) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "status": "error", "error": e.to_string() }),
        ),
    }
}

// ============================================================================
// Axum handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "somnus/1",
    }))
}

async fn events_handler(
    State(state): State<Arc<BotState>>,
    Json(event): Json<BotEvent>,
) -> impl IntoResponse {
    let (status, body) = events_inner(&state, event).await;
    (status, Json(body))
}

async fn sessions_handler(
    State(state): State<Arc<BotState>>,
    Query(query): Query<SessionsQuery>,
) -> impl IntoResponse {
    let (status, body) = sessions_inner(&state, query).await;
    (status, Json(body))
}
