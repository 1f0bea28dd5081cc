// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wall-clock helpers.
//!
//! All timestamps exchanged with clients (`createdAt`, `expiresAt`, message
//! `timestamp`) are Unix milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Time remaining until `deadline_ms`, or `None` if it has already passed.
pub fn until(deadline_ms: u64) -> Option<Duration> {
    let now = now_millis();
    if deadline_ms > now {
        Some(Duration::from_millis(deadline_ms - now))
    } else {
        None
    }
}
