// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Rate Limiting
//!
//! Per-session token buckets for chat messages. Shared between the relay
//! actor, which consumes tokens, and the background task that evicts idle
//! buckets.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How long a session's bucket may sit idle before it is evicted.
pub const BUCKET_IDLE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens regained per second.
    refill_rate: f64,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(per_minute: u32) -> Self {
        TokenBucket {
            tokens: per_minute as f64,
            capacity: per_minute as f64,
            refill_rate: per_minute as f64 / 60.0,
            last_seen: Instant::now(),
        }
    }

    fn take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_seen).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter keyed by session id.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    per_minute: u32,
}

impl RateLimiter {
    /// `per_minute` is both the burst size and the sustained rate.
    pub fn new(per_minute: u32) -> Self {
        RateLimiter {
            buckets: RwLock::new(HashMap::new()),
            per_minute,
        }
    }

    /// Takes one token for `session_id`. Returns false if the session is
    /// over its limit.
    pub fn consume(&self, session_id: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        buckets
            .entry(session_id.to_string())
            .or_insert_with(|| TokenBucket::full(self.per_minute))
            .take()
    }

    /// Evicts buckets idle for at least `max_idle`. Returns how many were
    /// removed.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap();
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < max_idle);
        before - buckets.len()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.buckets.read().unwrap().len()
    }
}
