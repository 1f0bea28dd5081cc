// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Interface
//!
//! The public router serves the authentication API, the WebSocket upgrade
//! and the health check. A separate operator router on the metrics listener
//! serves Prometheus metrics and the message history query.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::auth::{AuthError, AuthService};
use crate::connection_limit::ConnectionLimiter;
use crate::handler::{self, ConnectedSession, ConnectionDeps};
use crate::metrics::RelayMetrics;
use crate::relay::RelayHandle;

/// Shared state for the public router.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub relay: RelayHandle,
    pub metrics: RelayMetrics,
    pub connection_limiter: ConnectionLimiter,
    pub max_message_size: usize,
    pub outbound_buffer: usize,
    pub start_time: Instant,
}

/// Creates the public router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/challenge", get(challenge_handler))
        .route("/auth/verify", post(verify_handler))
        .route("/auth/session", get(session_handler))
        .route("/auth/logout", post(logout_handler))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            cleanup_middleware,
        ));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .fallback(not_found)
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Gives every API request a small chance to sweep expired challenges.
async fn cleanup_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.auth.maybe_cleanup();
    next.run(request).await
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

fn internal_error(e: AuthError) -> Response {
    error!("Session storage failure: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Internal error" })),
    )
        .into_response()
}

// ============================================================================
// Authentication API
// ============================================================================

async fn challenge_handler(State(state): State<AppState>) -> Response {
    match state.auth.issue_challenge() {
        Ok(issued) => {
            state.metrics.challenges_issued.inc();
            Json(json!({
                "sessionId": issued.session_id,
                "challenge": issued.challenge,
            }))
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    session_id: String,
    proof: String,
    address: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

// The body is parsed by hand so malformed input maps to the API's own 400
async fn verify_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<VerifyRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Invalid request" })),
        )
            .into_response();
    };

    match state.auth.verify_proof(
        &request.session_id,
        &request.proof,
        &request.address,
        request.expires_at,
    ) {
        Ok(verified) => {
            state.metrics.sessions_created.inc();
            Json(json!({
                "success": true,
                "address": verified.address,
                "sessionId": verified.session_id,
            }))
            .into_response()
        }
        Err(e @ AuthError::Storage(_)) => internal_error(e),
        Err(e) => {
            state.metrics.auth_failures.inc();
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": e.reason() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn session_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "error": "Missing sessionId" })),
        )
            .into_response();
    };

    match state.auth.get_session(&session_id) {
        Ok(Some(session)) => Json(json!({
            "valid": true,
            "address": session.address,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "valid": false, "error": "Session not found or expired" })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    session_id: String,
}

async fn logout_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<LogoutRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Invalid request" })),
        )
            .into_response();
    };

    match state.auth.remove_session(&request.session_id) {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Validates the session, then upgrades. The address comes from the stored
/// session, never from the client.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };

    let session = match state.auth.get_session(&session_id) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response();
        }
        Err(e) => return internal_error(e),
    };

    let Some(upgrade) = upgrade else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected Upgrade: websocket").into_response();
    };

    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            "Connection rejected: at max capacity ({}/{})",
            state.connection_limiter.active_count(),
            state.connection_limiter.max_connections()
        );
        state.metrics.connection_errors.inc();
        return (StatusCode::SERVICE_UNAVAILABLE, "Server at capacity").into_response();
    };

    let connected = ConnectedSession {
        session_id,
        address: session.address,
        user_expiry: session.user_expiry,
    };
    let deps = ConnectionDeps {
        relay: state.relay.clone(),
        metrics: state.metrics.clone(),
        outbound_buffer: state.outbound_buffer,
        guard,
    };

    upgrade
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handler::handle_connection(socket, connected, deps))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    address: Option<String>,
}

async fn messages_handler(
    State(state): State<MetricsState>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let address = query.address.filter(|a| !a.is_empty());
    match state.relay.list_messages(address).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => {
            error!("History query failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Relay unavailable" })),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = state.start_time.elapsed().as_secs();
    match state.relay.stats().await {
        Ok(stats) => Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": uptime,
            "online_users": stats.online_users,
            "history_len": stats.history_len,
        }))
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_seconds": uptime,
            })),
        )
            .into_response(),
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Shared state for the operator router.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: RelayMetrics,
    pub relay: RelayHandle,
    pub metrics_token: Option<String>,
}

/// Requires `Authorization: Bearer <token>` on everything but the index
/// when a token is configured.
async fn metrics_auth_middleware(
    State(state): State<MetricsState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() != "/" {
        if let Some(expected) = state.metrics_token.as_deref() {
            let authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected);

            if !authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the operator router: metrics and message history.
pub fn create_metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/messages", get(messages_handler))
        .route("/", get(metrics_root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn metrics_root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "ecc-chat-relay-metrics",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/metrics", "/messages"]
    }))
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
