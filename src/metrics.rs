// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics
//!
//! Counters and gauges for the chat relay, served on the metrics listener.

use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Connections
    /// WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// WebSocket connections currently open.
    pub connections_active: IntGauge,
    /// Upgrades refused or transports that failed.
    pub connection_errors: IntCounter,
    /// Addresses currently in the relay registry.
    pub online_users: IntGauge,

    // Messages
    pub messages_received: IntCounter,
    /// Frames queued to clients.
    pub messages_sent: IntCounter,
    /// Chat frames dropped (rate limited or undecodable).
    pub messages_rejected: IntCounter,
    pub rate_limited: IntCounter,

    // Auth
    pub challenges_issued: IntCounter,
    pub sessions_created: IntCounter,
    pub auth_failures: IntCounter,
    /// Connections closed at their user-chosen deadline.
    pub sessions_expired: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).unwrap()
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).unwrap()
}

impl RelayMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> Self {
        let metrics = RelayMetrics {
            registry: Arc::new(Registry::new()),
            connections_total: counter(
                "relay_connections_total",
                "Total WebSocket connections accepted",
            ),
            connections_active: gauge(
                "relay_connections_active",
                "Current open WebSocket connections",
            ),
            connection_errors: counter(
                "relay_connection_errors_total",
                "Refused upgrades and failed transports",
            ),
            online_users: gauge(
                "relay_online_users",
                "Connections registered with the relay",
            ),
            messages_received: counter(
                "relay_messages_received_total",
                "Chat messages received",
            ),
            messages_sent: counter(
                "relay_messages_sent_total",
                "Frames queued to clients",
            ),
            messages_rejected: counter(
                "relay_messages_rejected_total",
                "Inbound frames dropped",
            ),
            rate_limited: counter(
                "relay_rate_limited_total",
                "Chat messages over the per-session rate limit",
            ),
            challenges_issued: counter(
                "relay_challenges_issued_total",
                "Authentication challenges issued",
            ),
            sessions_created: counter(
                "relay_sessions_created_total",
                "Sessions created by a valid proof",
            ),
            auth_failures: counter(
                "relay_auth_failures_total",
                "Rejected proofs",
            ),
            sessions_expired: counter(
                "relay_sessions_expired_total",
                "Connections closed at their session deadline",
            ),
        };

        let collectors: [Box<dyn Collector>; 12] = [
            Box::new(metrics.connections_total.clone()),
            Box::new(metrics.connections_active.clone()),
            Box::new(metrics.connection_errors.clone()),
            Box::new(metrics.online_users.clone()),
            Box::new(metrics.messages_received.clone()),
            Box::new(metrics.messages_sent.clone()),
            Box::new(metrics.messages_rejected.clone()),
            Box::new(metrics.rate_limited.clone()),
            Box::new(metrics.challenges_issued.clone()),
            Box::new(metrics.sessions_created.clone()),
            Box::new(metrics.auth_failures.clone()),
            Box::new(metrics.sessions_expired.clone()),
        ];
        for collector in collectors {
            metrics.registry.register(collector).unwrap();
        }

        metrics
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_lists_registered_metrics() {
        let metrics = RelayMetrics::new();
        metrics.challenges_issued.inc();
        metrics.online_users.set(3);

        let text = metrics.encode();

        assert!(text.contains("relay_challenges_issued_total 1"));
        assert!(text.contains("relay_online_users 3"));
        assert!(text.contains("relay_sessions_expired_total 0"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = RelayMetrics::new();
        let b = RelayMetrics::new();
        a.messages_received.inc();

        assert_eq!(a.messages_received.get(), 1);
        assert_eq!(b.messages_received.get(), 0);
    }
}
