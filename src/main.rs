// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! ECC Chat Relay Server
//!
//! Relays end-to-end encrypted chat between holders of key pairs.
//! Provides:
//! - Challenge-response authentication yielding durable sessions
//! - WebSocket endpoint with presence, direct and broadcast messaging
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Rate limiting and connection caps

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use ecc_chat_relay::build_state;
use ecc_chat_relay::config::RelayConfig;
use ecc_chat_relay::http::{create_metrics_router, create_router, MetricsState};
use ecc_chat_relay::kv_store::{create_kv_store, KvStore};
use ecc_chat_relay::metrics::RelayMetrics;
use ecc_chat_relay::rate_limit::BUCKET_IDLE;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ecc_chat_relay=info".parse().unwrap()),
        )
        .init();

    let config = RelayConfig::from_env();

    info!("Starting ECC Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("API and WebSocket: {}", config.listen_addr);
    info!("Metrics endpoint: {}", config.metrics_addr);
    info!("Storage backend: {:?}", config.storage_backend);
    info!(
        "Session TTL: {}s, challenge TTL: {}s, history: {} messages",
        config.session_ttl_secs, config.challenge_ttl_secs, config.history_capacity
    );

    let kv: Arc<dyn KvStore> =
        match create_kv_store(config.storage_backend, Some(&config.data_dir)) {
            Ok(store) => Arc::from(store),
            Err(e) => {
                error!("Failed to open session storage: {}", e);
                std::process::exit(1);
            }
        };
    info!("Session store holds {} records", kv.len());

    let metrics = RelayMetrics::new();
    let (state, rate_limiter) = build_state(&config, kv, metrics.clone());

    // Sweep expired challenges and sessions
    let sweep_auth = state.auth.clone();
    let cleanup_interval = config.cleanup_interval();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(cleanup_interval).await;
            match sweep_auth.sweep() {
                Ok((challenges, sessions)) if challenges + sessions > 0 => {
                    info!(
                        "Cleaned up {} expired challenges and {} expired sessions",
                        challenges, sessions
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Session sweep failed: {}", e),
            }
        }
    });

    // Evict idle rate limiter buckets
    let cleanup_rate_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = cleanup_rate_limiter.cleanup_inactive(BUCKET_IDLE);
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    if config.metrics_token.is_some() {
        info!("Metrics and history endpoints protected with bearer token");
    } else if !config.metrics_addr.ip().is_loopback() {
        warn!("Metrics and history exposed on non-localhost without auth token");
        warn!("Consider setting RELAY_METRICS_TOKEN for production use");
    }

    let metrics_router = create_metrics_router(MetricsState {
        metrics,
        relay: state.relay.clone(),
        metrics_token: config.metrics_token.clone(),
    });
    let metrics_listener = TcpListener::bind(config.metrics_addr)
        .await
        .expect("Failed to bind metrics listener");
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        info!("Metrics server listening on {}", metrics_addr);
        if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .expect("Failed to bind API listener");
    info!("Relay listening on {}", config.listen_addr);

    if let Err(e) = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server failed: {}", e);
    }

    info!("Relay shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
