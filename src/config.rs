// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Server Configuration
//!
//! Configuration loaded from `RELAY_*` environment variables. Values that
//! fail to parse are ignored and the default is kept.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kv_store::StorageBackend;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address serving the API and the WebSocket endpoint.
    pub listen_addr: SocketAddr,
    /// Address serving Prometheus metrics.
    pub metrics_addr: SocketAddr,
    /// Bearer token required on `/metrics` when set.
    pub metrics_token: Option<String>,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum inbound WebSocket frame size in bytes.
    pub max_message_size: usize,
    /// Messages retained by the relay.
    pub history_capacity: usize,
    pub challenge_ttl_secs: u64,
    /// Storage-layer ceiling on session lifetime.
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Chat messages per session per minute.
    pub rate_limit_per_min: u32,
    /// Frames queued per connection before new frames are dropped.
    pub outbound_buffer: usize,
    pub storage_backend: StorageBackend,
    /// Directory holding `sessions.db`.
    pub data_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8787)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 8788)),
            metrics_token: None,
            max_connections: 1000,
            max_message_size: 64 * 1024,
            history_capacity: crate::history::DEFAULT_CAPACITY,
            challenge_ttl_secs: 5 * 60,
            session_ttl_secs: 24 * 60 * 60,
            cleanup_interval_secs: 3600,
            rate_limit_per_min: 120,
            outbound_buffer: 256,
            storage_backend: StorageBackend::Sqlite,
            data_dir: PathBuf::from("./data"),
        }
    }
}

fn override_from<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(val) = std::env::var(var) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from("RELAY_LISTEN_ADDR", &mut config.listen_addr);
        override_from("RELAY_METRICS_ADDR", &mut config.metrics_addr);
        override_from("RELAY_MAX_CONNECTIONS", &mut config.max_connections);
        override_from("RELAY_MAX_MESSAGE_SIZE", &mut config.max_message_size);
        override_from("RELAY_HISTORY_CAPACITY", &mut config.history_capacity);
        override_from("RELAY_CHALLENGE_TTL", &mut config.challenge_ttl_secs);
        override_from("RELAY_SESSION_TTL", &mut config.session_ttl_secs);
        override_from("RELAY_CLEANUP_INTERVAL", &mut config.cleanup_interval_secs);
        override_from("RELAY_RATE_LIMIT", &mut config.rate_limit_per_min);
        override_from("RELAY_OUTBOUND_BUFFER", &mut config.outbound_buffer);

        if let Ok(token) = std::env::var("RELAY_METRICS_TOKEN") {
            if !token.is_empty() {
                config.metrics_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("RELAY_STORAGE_BACKEND") {
            config.storage_backend = match val.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                _ => StorageBackend::Sqlite,
            };
        }

        if let Ok(val) = std::env::var("RELAY_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        config
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
