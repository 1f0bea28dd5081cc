// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Challenge Store
//!
//! Process-local table of outstanding authentication challenges, keyed by
//! the session id they were issued under. Challenges live only in memory;
//! a restart simply forces clients to request a new one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::now_millis;
use crate::kv_store::StorageError;

/// An issued challenge awaiting proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// The exact text the client must reproduce.
    pub value: String,
    /// Issuance time (Unix milliseconds).
    pub issued_at: u64,
}

impl Challenge {
    /// Creates a challenge issued now.
    pub fn new(value: String) -> Self {
        Challenge {
            value,
            issued_at: now_millis(),
        }
    }

    /// A challenge is expired once strictly more than `ttl` has elapsed
    /// since issuance.
    pub fn is_expired(&self, ttl: Duration, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.issued_at) > ttl.as_millis() as u64
    }
}

/// In-memory challenge table shared by request handlers.
pub struct ChallengeStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore {
    /// Creates an empty challenge store.
    pub fn new() -> Self {
        ChallengeStore {
            challenges: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Challenge>>, StorageError> {
        self.challenges.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Stores a challenge under `session_id`, replacing any previous one.
    pub fn insert(&self, session_id: &str, challenge: Challenge) -> Result<(), StorageError> {
        self.lock()?.insert(session_id.to_string(), challenge);
        Ok(())
    }

    /// Returns the challenge stored under `session_id`, if any.
    pub fn get(&self, session_id: &str) -> Result<Option<Challenge>, StorageError> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    /// Removes and returns the challenge stored under `session_id`.
    pub fn remove(&self, session_id: &str) -> Result<Option<Challenge>, StorageError> {
        Ok(self.lock()?.remove(session_id))
    }

    /// Drops every challenge older than `ttl`. Returns the number removed.
    pub fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut challenges = self.lock()?;
        let initial_len = challenges.len();
        challenges.retain(|_, c| !c.is_expired(ttl, now));
        Ok(initial_len - challenges.len())
    }

    /// Number of outstanding challenges.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_at(value: &str, issued_at: u64) -> Challenge {
        Challenge {
            value: value.to_string(),
            issued_at,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = ChallengeStore::new();
        store
            .insert("sid-1", Challenge::new("hello".to_string()))
            .unwrap();

        assert_eq!(store.get("sid-1").unwrap().unwrap().value, "hello");
        assert!(store.get("sid-2").unwrap().is_none());
    }

    #[test]
    fn test_remove_is_single_shot() {
        let store = ChallengeStore::new();
        store
            .insert("sid-1", Challenge::new("hello".to_string()))
            .unwrap();

        assert!(store.remove("sid-1").unwrap().is_some());
        assert!(store.remove("sid-1").unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_expiry_boundary() {
        let ttl = Duration::from_secs(300);
        let c = challenge_at("x", 1_000);

        assert!(!c.is_expired(ttl, 1_000 + 300_000));
        assert!(c.is_expired(ttl, 1_000 + 300_001));
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let store = ChallengeStore::new();
        let now = now_millis();
        store.insert("fresh", challenge_at("a", now)).unwrap();
        store
            .insert("stale", challenge_at("b", now - 10 * 60 * 1000))
            .unwrap();

        let removed = store.cleanup_expired(Duration::from_secs(300)).unwrap();

        assert_eq!(removed, 1);
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("stale").unwrap().is_none());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let store = std::sync::Arc::new(ChallengeStore::new());
        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.challenges.lock().unwrap();
            panic!("poison the challenge table");
        })
        .join();

        assert!(matches!(
            store.insert("sid", challenge_at("a", 0)),
            Err(StorageError::Poisoned)
        ));
        assert!(matches!(store.get("sid"), Err(StorageError::Poisoned)));
        assert!(matches!(store.len(), Err(StorageError::Poisoned)));
    }
}
