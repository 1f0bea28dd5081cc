// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Actor
//!
//! The single chat room. One task owns the connection registry and the
//! message history and applies commands from one ordered channel, each to
//! completion before the next. Connection tasks, expiry timers and HTTP
//! handlers reach it only through [`RelayHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::clock::{self, now_millis};
use crate::connection_registry::{
    CloseRequest, Connection, ConnectionId, ConnectionRegistry, Outbound, SendOutcome,
};
use crate::history::MessageHistory;
use crate::metrics::RelayMetrics;
use crate::protocol::{self, ChatMessage, ClientMessage, Decoded, ServerEvent};
use crate::rate_limit::RateLimiter;

/// Capacity of the actor's command queue.
const COMMAND_BUFFER: usize = 1024;

/// Normal closure code sent with server-initiated closes.
pub const CLOSE_NORMAL: u16 = 1000;

/// Relay failures visible to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("session already expired")]
    SessionExpired,
    #[error("relay is not running")]
    Unavailable,
}

/// Snapshot of relay occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub online_users: usize,
    pub history_len: usize,
}

/// A request to register a freshly upgraded connection.
#[derive(Debug)]
pub struct ConnectRequest {
    pub session_id: String,
    pub address: String,
    pub user_expiry: Option<u64>,
    pub outbound: mpsc::Sender<Outbound>,
    pub closer: oneshot::Sender<CloseRequest>,
}

enum RelayCommand {
    Connect {
        request: ConnectRequest,
        reply: oneshot::Sender<Result<ConnectionId, RelayError>>,
    },
    Inbound {
        session_id: String,
        id: ConnectionId,
        text: String,
    },
    Closed {
        session_id: String,
        id: ConnectionId,
    },
    TransportError {
        session_id: String,
        id: ConnectionId,
    },
    Expire {
        session_id: String,
        id: ConnectionId,
    },
    ListMessages {
        address: Option<String>,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Cloneable entry point to the relay actor.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RelayError::Unavailable)
    }

    /// Registers a connection, sends it the roster and announces it to the
    /// other connections.
    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectionId, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Connect { request, reply }).await?;
        rx.await.map_err(|_| RelayError::Unavailable)?
    }

    /// Forwards a text frame received on connection `id`.
    pub async fn inbound(
        &self,
        session_id: &str,
        id: ConnectionId,
        text: String,
    ) -> Result<(), RelayError> {
        self.send(RelayCommand::Inbound {
            session_id: session_id.to_string(),
            id,
            text,
        })
        .await
    }

    /// Reports a graceful close of connection `id`.
    pub async fn closed(&self, session_id: &str, id: ConnectionId) -> Result<(), RelayError> {
        self.send(RelayCommand::Closed {
            session_id: session_id.to_string(),
            id,
        })
        .await
    }

    /// Reports a transport failure on connection `id`.
    pub async fn transport_error(
        &self,
        session_id: &str,
        id: ConnectionId,
    ) -> Result<(), RelayError> {
        self.send(RelayCommand::TransportError {
            session_id: session_id.to_string(),
            id,
        })
        .await
    }

    /// Returns retained messages, optionally only those involving `address`.
    pub async fn list_messages(
        &self,
        address: Option<String>,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::ListMessages { address, reply })
            .await?;
        rx.await.map_err(|_| RelayError::Unavailable)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply }).await?;
        rx.await.map_err(|_| RelayError::Unavailable)
    }
}

/// Actor state. Only ever touched from the actor task.
pub struct Relay {
    registry: ConnectionRegistry,
    history: MessageHistory,
    rate_limiter: Arc<RateLimiter>,
    metrics: RelayMetrics,
    commands: mpsc::Receiver<RelayCommand>,
    // Weak so pending timers do not keep the actor alive
    timers: mpsc::WeakSender<RelayCommand>,
    next_id: ConnectionId,
}

impl Relay {
    /// Starts the relay actor. It runs until every handle is dropped.
    pub fn spawn(
        history_capacity: usize,
        rate_limiter: Arc<RateLimiter>,
        metrics: RelayMetrics,
    ) -> RelayHandle {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let relay = Relay {
            registry: ConnectionRegistry::new(),
            history: MessageHistory::new(history_capacity),
            rate_limiter,
            metrics,
            commands,
            timers: tx.downgrade(),
            next_id: 0,
        };
        tokio::spawn(relay.run());
        RelayHandle { tx }
    }

    async fn run(mut self) {
        info!(
            "Relay started (history capacity {})",
            self.history.capacity()
        );
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        info!("Relay stopped");
    }

    fn handle(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Connect { request, reply } => {
                let _ = reply.send(self.on_connect(request));
            }
            RelayCommand::Inbound {
                session_id,
                id,
                text,
            } => self.on_inbound(&session_id, id, &text),
            RelayCommand::Closed { session_id, id } => self.on_closed(&session_id, id),
            RelayCommand::TransportError { session_id, id } => {
                self.on_transport_error(&session_id, id)
            }
            RelayCommand::Expire { session_id, id } => self.on_expire(&session_id, id),
            RelayCommand::ListMessages { address, reply } => {
                let _ = reply.send(self.history.list(address.as_deref()));
            }
            RelayCommand::Stats { reply } => {
                let _ = reply.send(RelayStats {
                    online_users: self.registry.connected_count(),
                    history_len: self.history.len(),
                });
            }
        }
        self.metrics
            .online_users
            .set(self.registry.connected_count() as i64);
    }

    fn on_connect(&mut self, request: ConnectRequest) -> Result<ConnectionId, RelayError> {
        let ConnectRequest {
            session_id,
            address,
            user_expiry,
            outbound,
            closer,
        } = request;

        let remaining = match user_expiry {
            Some(deadline) => match clock::until(deadline) {
                Some(remaining) => Some(remaining),
                None => return Err(RelayError::SessionExpired),
            },
            None => None,
        };

        self.next_id += 1;
        let id = self.next_id;

        let mut connection =
            Connection::new(id, session_id.clone(), address.clone(), user_expiry, outbound, closer);
        if let Some(remaining) = remaining {
            connection.set_expiry_timer(self.schedule_expiry(session_id.clone(), id, remaining));
        }

        if let Some(mut replaced) = self.registry.register(connection) {
            info!("Connection {} replaced by {}", replaced.id, id);
            replaced.close(CLOSE_NORMAL, "Replaced by new connection");
        }

        // The roster includes the new connection itself
        let roster = ServerEvent::OnlineUsers {
            users: self.registry.roster(),
        };
        self.send_to(&session_id, id, &roster);

        self.broadcast(
            &ServerEvent::UserConnected {
                address,
                expires_at: user_expiry,
            },
            Some(&session_id),
        );

        info!(
            "Connection {} registered ({} online)",
            id,
            self.registry.connected_count()
        );
        Ok(id)
    }

    fn schedule_expiry(
        &self,
        session_id: String,
        id: ConnectionId,
        after: Duration,
    ) -> AbortHandle {
        let commands = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(RelayCommand::Expire { session_id, id }).await;
            }
        })
        .abort_handle()
    }

    fn on_inbound(&mut self, session_id: &str, id: ConnectionId, text: &str) {
        let Some(connection) = self.registry.get(session_id, id) else {
            debug!("Frame from unregistered connection {}", id);
            return;
        };
        let from = connection.address.clone();

        match protocol::decode_client_message(text) {
            Ok(Decoded {
                message: ClientMessage::Ping,
                ..
            }) => self.send_to(session_id, id, &ServerEvent::Pong),
            Ok(Decoded {
                message:
                    ClientMessage::ChatMessage {
                        to,
                        content,
                        signature,
                    },
                ..
            }) => {
                self.metrics.messages_received.inc();
                if !self.rate_limiter.consume(session_id) {
                    warn!("Connection {} rate limited", id);
                    self.metrics.rate_limited.inc();
                    self.metrics.messages_rejected.inc();
                    return;
                }
                // Whitespace-only means broadcast; otherwise only the case
                // is normalized
                let to = to.unwrap_or_default();
                let to = if to.trim().is_empty() {
                    String::new()
                } else {
                    to.to_lowercase()
                };
                let message = ChatMessage {
                    from,
                    to,
                    content: content.unwrap_or_default(),
                    timestamp: now_millis(),
                    signature: signature.unwrap_or_default(),
                };
                self.on_chat_message(session_id, id, message);
            }
            Ok(Decoded {
                message: ClientMessage::Unknown,
                tag,
            }) => {
                warn!("Ignoring unknown message type {:?} from {}", tag, id);
            }
            Err(e) => {
                warn!("Ignoring undecodable frame from {}: {}", id, e);
                self.metrics.messages_rejected.inc();
            }
        }
    }

    fn on_chat_message(&mut self, session_id: &str, id: ConnectionId, message: ChatMessage) {
        self.history.push(message.clone());

        if message.is_broadcast() {
            debug!("Broadcast from connection {}", id);
            // Broadcasts include the sender
            self.broadcast(&ServerEvent::ChatMessage { message }, None);
            return;
        }

        let recipients: Vec<(String, ConnectionId)> = self
            .registry
            .by_address(&message.to)
            .map(|c| (c.session_id.clone(), c.id))
            .collect();
        if recipients.is_empty() {
            debug!("Recipient offline, message kept in history only");
        }

        let delivery = ServerEvent::ChatMessage {
            message: message.clone(),
        };
        for (recipient_session, recipient_id) in &recipients {
            self.send_to(recipient_session, *recipient_id, &delivery);
        }

        self.send_to(session_id, id, &ServerEvent::MessageSent { message });
    }

    fn on_closed(&mut self, session_id: &str, id: ConnectionId) {
        let Some(connection) = self.registry.unregister(session_id, id) else {
            debug!("Close for stale connection {}", id);
            return;
        };
        info!("Connection {} closed", id);
        self.broadcast(
            &ServerEvent::UserDisconnected {
                address: connection.address.clone(),
            },
            Some(session_id),
        );
    }

    fn on_transport_error(&mut self, session_id: &str, id: ConnectionId) {
        if self.registry.unregister(session_id, id).is_some() {
            warn!("Connection {} dropped after transport error", id);
        }
    }

    fn on_expire(&mut self, session_id: &str, id: ConnectionId) {
        let Some(mut connection) = self.registry.unregister(session_id, id) else {
            debug!("Expiry timer fired for departed connection {}", id);
            return;
        };
        info!("Connection {} reached its session deadline", id);
        if !connection.close(CLOSE_NORMAL, "Session expired") {
            debug!("Connection {} already gone at expiry", id);
        }
        self.metrics.sessions_expired.inc();
        self.broadcast(
            &ServerEvent::SessionExpired {
                address: connection.address.clone(),
            },
            None,
        );
    }

    /// Queues `event` for one connection. A dead connection is removed.
    fn send_to(&mut self, session_id: &str, id: ConnectionId, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        let outcome = match self.registry.get(session_id, id) {
            Some(connection) => connection.try_send(Outbound::Text(frame)),
            None => return,
        };
        self.record_outcome(session_id, id, outcome);
    }

    /// Queues `event` for every registered connection except `exclude`.
    fn broadcast(&mut self, event: &ServerEvent, exclude: Option<&str>) {
        let Some(frame) = encode(event) else {
            return;
        };
        let outcomes: Vec<(String, ConnectionId, SendOutcome)> = self
            .registry
            .iter()
            .filter(|c| exclude != Some(c.session_id.as_str()))
            .map(|c| {
                let outcome = c.try_send(Outbound::Text(frame.clone()));
                (c.session_id.clone(), c.id, outcome)
            })
            .collect();
        for (session_id, id, outcome) in outcomes {
            self.record_outcome(&session_id, id, outcome);
        }
    }

    fn record_outcome(&mut self, session_id: &str, id: ConnectionId, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Queued => self.metrics.messages_sent.inc(),
            SendOutcome::Full => {
                warn!("Outbound queue full for connection {}, frame dropped", id);
            }
            SendOutcome::Closed => {
                // Implicit disconnect, no presence broadcast
                if self.registry.unregister(session_id, id).is_some() {
                    warn!("Connection {} is gone, removed from registry", id);
                }
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            None
        }
    }
}
