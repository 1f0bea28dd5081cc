// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Bridges one upgraded WebSocket to the relay actor. Inbound text frames
//! are forwarded to the actor in arrival order; frames the actor queues for
//! this connection are written out by the same task.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::connection_limit::ConnectionGuard;
use crate::connection_registry::{CloseRequest, Outbound};
use crate::metrics::RelayMetrics;
use crate::relay::{ConnectRequest, RelayError, RelayHandle, CLOSE_NORMAL};

/// Identity attached server-side after the session was validated.
#[derive(Debug, Clone)]
pub struct ConnectedSession {
    pub session_id: String,
    pub address: String,
    pub user_expiry: Option<u64>,
}

/// Dependencies for a connection task.
pub struct ConnectionDeps {
    pub relay: RelayHandle,
    pub metrics: RelayMetrics,
    pub outbound_buffer: usize,
    /// Held for the life of the connection.
    pub guard: ConnectionGuard,
}

/// How the connection loop ended.
enum Ended {
    /// The client closed or the stream ended.
    Closed,
    /// The relay closed us (expiry, replacement) or went away.
    ClosedByRelay,
    /// Read or write failed.
    TransportError,
}

/// Runs one WebSocket connection to completion.
pub async fn handle_connection(socket: WebSocket, session: ConnectedSession, deps: ConnectionDeps) {
    let ConnectionDeps {
        relay,
        metrics,
        outbound_buffer,
        guard,
    } = deps;
    let _guard = guard;

    // Short random label; session ids are bearer credentials and never logged
    let label = &uuid::Uuid::new_v4().to_string()[..8];

    let (mut write, mut read) = socket.split();
    let (tx, mut outbound) = mpsc::channel(outbound_buffer.max(1));
    let (closer, mut close_requested) = oneshot::channel::<CloseRequest>();

    let id = match relay
        .connect(ConnectRequest {
            session_id: session.session_id.clone(),
            address: session.address.clone(),
            user_expiry: session.user_expiry,
            outbound: tx,
            closer,
        })
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let reason = match e {
                RelayError::SessionExpired => {
                    info!("[{}] Session expired before registration", label);
                    "Session expired"
                }
                RelayError::Unavailable => {
                    error!("[{}] Relay unavailable", label);
                    "Relay unavailable"
                }
            };
            metrics.connection_errors.inc();
            let _ = write
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_NORMAL,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    metrics.connections_total.inc();
    metrics.connections_active.inc();
    info!("[{}] Connected", label);

    let ended = loop {
        tokio::select! {
            // A relay close wins over any backlog still queued
            biased;

            close = &mut close_requested => {
                if let Ok(CloseRequest { code, reason }) = close {
                    debug!("[{}] Closing: {}", label, reason);
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                }
                break Ended::ClosedByRelay;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if relay.inbound(&session.session_id, id, text).await.is_err() {
                        break Ended::ClosedByRelay;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("[{}] Ignoring binary frame", label);
                }
                // Pings are answered by the transport
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break Ended::Closed,
                Some(Err(e)) => {
                    warn!("[{}] Read failed: {}", label, e);
                    break Ended::TransportError;
                }
            },
            queued = outbound.recv() => match queued {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!("[{}] Write failed: {}", label, e);
                        break Ended::TransportError;
                    }
                }
                None => break Ended::ClosedByRelay,
            },
        }
    };

    // Stale ids are ignored by the relay, so reporting after a relay-side
    // close is harmless
    let reported = match ended {
        Ended::Closed | Ended::ClosedByRelay => relay.closed(&session.session_id, id).await,
        Ended::TransportError => {
            metrics.connection_errors.inc();
            relay.transport_error(&session.session_id, id).await
        }
    };
    if reported.is_err() {
        debug!("[{}] Relay stopped before disconnect was reported", label);
    }

    metrics.connections_active.dec();
    info!("[{}] Disconnected", label);
}
