// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence-aware relay for end-to-end encrypted chat.

pub mod auth;
pub mod challenge_store;
pub mod clock;
pub mod config;
pub mod connection_limit;
pub mod connection_registry;
pub mod handler;
pub mod history;
pub mod http;
pub mod kv_store;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod relay;
pub mod session_store;

use std::sync::Arc;
use std::time::Instant;

use auth::AuthService;
use config::RelayConfig;
use connection_limit::ConnectionLimiter;
use http::AppState;
use kv_store::KvStore;
use metrics::RelayMetrics;
use rate_limit::RateLimiter;
use relay::Relay;
use session_store::SessionStore;

/// Wires the auth service and spawns the relay actor. Must be called inside
/// a Tokio runtime.
///
/// Returns the router state and the chat rate limiter, whose idle buckets
/// the caller is expected to evict periodically.
pub fn build_state(
    config: &RelayConfig,
    kv: Arc<dyn KvStore>,
    metrics: RelayMetrics,
) -> (AppState, Arc<RateLimiter>) {
    let sessions = SessionStore::new(kv, config.session_ttl());
    let auth = Arc::new(AuthService::new(sessions, config.challenge_ttl()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));
    let relay = Relay::spawn(
        config.history_capacity,
        rate_limiter.clone(),
        metrics.clone(),
    );

    let state = AppState {
        auth,
        relay,
        metrics,
        connection_limiter: ConnectionLimiter::new(config.max_connections),
        max_message_size: config.max_message_size,
        outbound_buffer: config.outbound_buffer,
        start_time: Instant::now(),
    };
    (state, rate_limiter)
}
