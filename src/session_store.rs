// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Store
//!
//! Durable record of authenticated identities. Sessions are written once
//! with the storage-layer TTL and are afterwards only read or deleted, so
//! concurrent handlers never race on a read-modify-write.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::now_millis;
use crate::kv_store::{KvStore, StorageError};

const KEY_PREFIX: &str = "session:";

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Lowercased identity address.
    pub address: String,
    pub authenticated: bool,
    /// Creation time (Unix milliseconds).
    pub created_at: u64,
    /// User-chosen deadline (Unix milliseconds), independent of the storage TTL.
    #[serde(rename = "expiresAt")]
    pub user_expiry: Option<u64>,
}

impl Session {
    /// Creates an authenticated session for `address`, normalizing it to
    /// lowercase. A zero expiry means no user deadline.
    pub fn new(address: &str, user_expiry: Option<u64>) -> Self {
        Session {
            address: address.to_lowercase(),
            authenticated: true,
            created_at: now_millis(),
            user_expiry: user_expiry.filter(|&t| t > 0),
        }
    }

    /// True once the user-chosen deadline has passed.
    pub fn is_user_expired(&self, now_ms: u64) -> bool {
        self.user_expiry.is_some_and(|deadline| now_ms > deadline)
    }
}

/// Session persistence over an expiring key-value store.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionStore {
    /// Creates a store whose records expire `ttl` after being written.
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        SessionStore { kv, ttl }
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    /// Persists a session under `session_id`.
    pub fn put(&self, session_id: &str, session: &Session) -> Result<(), StorageError> {
        let value = serde_json::to_string(session)?;
        self.kv.put(&Self::key(session_id), &value, self.ttl)
    }

    /// Loads a session as stored, without checking the user deadline.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        match self.kv.get(&Self::key(session_id))? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Deletes a session. Idempotent.
    pub fn remove(&self, session_id: &str) -> Result<bool, StorageError> {
        self.kv.delete(&Self::key(session_id))
    }

    /// Sweeps records whose storage TTL has elapsed.
    pub fn cleanup_expired(&self) -> Result<usize, StorageError> {
        self.kv.cleanup_expired()
    }

    /// Number of stored records (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
