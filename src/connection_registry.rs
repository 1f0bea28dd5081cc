// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Tracks live WebSocket connections so the relay can route direct
//! messages, fan out broadcasts and announce presence.
//!
//! The registry maps session ids to per-connection outbound queues. It is
//! owned by the relay actor and only ever touched from the actor task, so
//! it carries no locks.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::protocol::OnlineUser;

/// Identifies one physical connection. A session that reconnects gets a
/// new id, which lets the actor ignore events from the replaced transport.
pub type ConnectionId = u64;

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(String),
}

/// Server-initiated close. Delivered on its own channel so it is never
/// dropped behind a full outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: &'static str,
}

/// Result of queueing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The writer is lagging; this frame was dropped.
    Full,
    /// The writer is gone; the connection is dead.
    Closed,
}

/// A registered connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub session_id: String,
    pub address: String,
    /// User-chosen session deadline cached at connect time.
    pub user_expiry: Option<u64>,
    tx: mpsc::Sender<Outbound>,
    closer: Option<oneshot::Sender<CloseRequest>>,
    expiry_timer: Option<AbortHandle>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        session_id: String,
        address: String,
        user_expiry: Option<u64>,
        tx: mpsc::Sender<Outbound>,
        closer: oneshot::Sender<CloseRequest>,
    ) -> Self {
        Connection {
            id,
            session_id,
            address,
            user_expiry,
            tx,
            closer: Some(closer),
            expiry_timer: None,
        }
    }

    /// Attaches the one-shot expiry timer; it is aborted when the
    /// connection is dropped.
    pub fn set_expiry_timer(&mut self, timer: AbortHandle) {
        self.expiry_timer = Some(timer);
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, frame: Outbound) -> SendOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Asks the writer task to close the transport. Only the first request
    /// is delivered. Returns false if the writer is already gone.
    pub fn close(&mut self, code: u16, reason: &'static str) -> bool {
        match self.closer.take() {
            Some(closer) => closer.send(CloseRequest { code, reason }).is_ok(),
            None => false,
        }
    }

    pub fn online_user(&self) -> OnlineUser {
        OnlineUser {
            address: self.address.clone(),
            expires_at: self.user_expiry,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
    }
}

/// Registry of live connections keyed by session id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: HashMap::new(),
        }
    }

    /// Registers a connection. If the session was already connected the
    /// previous connection is returned so the caller can close it.
    pub fn register(&mut self, connection: Connection) -> Option<Connection> {
        self.connections
            .insert(connection.session_id.clone(), connection)
    }

    /// Removes the connection for `session_id`, but only if it is still the
    /// connection identified by `id`.
    pub fn unregister(&mut self, session_id: &str, id: ConnectionId) -> Option<Connection> {
        if self.get(session_id, id).is_some() {
            self.connections.remove(session_id)
        } else {
            None
        }
    }

    /// Looks up a connection by session id and connection id.
    pub fn get(&self, session_id: &str, id: ConnectionId) -> Option<&Connection> {
        self.connections
            .get(session_id)
            .filter(|c| c.id == id)
    }

    /// All connections authenticated as `address`.
    pub fn by_address<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections
            .values()
            .filter(move |c| c.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Roster snapshot of every registered connection.
    pub fn roster(&self) -> Vec<OnlineUser> {
        self.connections.values().map(Connection::online_user).collect()
    }

    /// Returns the number of currently connected clients.
    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }
}
