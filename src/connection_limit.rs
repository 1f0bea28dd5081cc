// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Limiting
//!
//! Caps concurrent WebSocket connections. A slot is held by a
//! [`ConnectionGuard`] for the lifetime of the connection task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ConnectionLimiter {
    slots: Arc<Slots>,
}

struct Slots {
    in_use: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            slots: Arc::new(Slots {
                in_use: AtomicUsize::new(0),
                max: max_connections,
            }),
        }
    }

    /// Claims a slot, or returns `None` at capacity.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        self.slots
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.slots.max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionGuard {
                slots: self.slots.clone(),
            })
    }

    pub fn active_count(&self) -> usize {
        self.slots.in_use.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.slots.max
    }
}

/// Releases its slot on drop.
pub struct ConnectionGuard {
    slots: Arc<Slots>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.slots.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}
