// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Challenge-Response Authentication
//!
//! Issues challenges and turns a matching proof into a durable session.
//!
//! The proof check is plain string equality: the client encrypts the
//! challenge to its own public key and decrypts it with its private key,
//! so only the key holder can reproduce the text. No signature is verified
//! here.

use std::time::Duration;

use tracing::{debug, warn};

use crate::challenge_store::{Challenge, ChallengeStore};
use crate::clock::now_millis;
use crate::kv_store::StorageError;
use crate::session_store::{Session, SessionStore};

/// Default challenge lifetime (5 minutes).
pub const CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Fraction of API requests that trigger a challenge sweep.
pub const CLEANUP_PROBABILITY: f64 = 0.01;

/// Authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Challenge not found")]
    ChallengeNotFound,
    #[error("Challenge expired")]
    ChallengeExpired,
    #[error("Invalid proof - challenge mismatch")]
    ProofMismatch,
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Reason string reported to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::ChallengeNotFound => "Challenge not found",
            AuthError::ChallengeExpired => "Challenge expired",
            AuthError::ProofMismatch => "Invalid proof - challenge mismatch",
            AuthError::Storage(_) => "Internal error",
        }
    }
}

/// A freshly issued challenge.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub session_id: String,
    pub challenge: String,
}

/// Result of a successful proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Normalized (lowercase) address.
    pub address: String,
    pub session_id: String,
}

/// Auth service composing the challenge table and the session store.
///
/// Constructed once at startup and shared with request handlers.
pub struct AuthService {
    challenges: ChallengeStore,
    sessions: SessionStore,
    challenge_ttl: Duration,
}

impl AuthService {
    pub fn new(sessions: SessionStore, challenge_ttl: Duration) -> Self {
        AuthService {
            challenges: ChallengeStore::new(),
            sessions,
            challenge_ttl,
        }
    }

    /// Builds the challenge text. Only ever compared for equality.
    fn challenge_text() -> String {
        format!(
            "Sign this message to authenticate with ECC:\n\nNonce: {}\nTimestamp: {}",
            uuid::Uuid::new_v4(),
            now_millis()
        )
    }

    /// Issues a challenge under a new random session id.
    pub fn issue_challenge(&self) -> Result<IssuedChallenge, AuthError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let challenge = Self::challenge_text();
        self.challenges
            .insert(&session_id, Challenge::new(challenge.clone()))?;
        Ok(IssuedChallenge {
            session_id,
            challenge,
        })
    }

    /// Verifies `proof` against the challenge issued under `session_id` and,
    /// on success, persists a session for `address`.
    ///
    /// A mismatched proof leaves the challenge in place until it expires.
    pub fn verify_proof(
        &self,
        session_id: &str,
        proof: &str,
        address: &str,
        user_expiry: Option<u64>,
    ) -> Result<Verified, AuthError> {
        let challenge = self
            .challenges
            .get(session_id)?
            .ok_or(AuthError::ChallengeNotFound)?;

        if challenge.is_expired(self.challenge_ttl, now_millis()) {
            self.challenges.remove(session_id)?;
            return Err(AuthError::ChallengeExpired);
        }

        if proof != challenge.value {
            debug!("Proof mismatch for pending challenge");
            return Err(AuthError::ProofMismatch);
        }

        // Take the challenge before persisting so two concurrent proofs
        // cannot both succeed
        if self.challenges.remove(session_id)?.is_none() {
            return Err(AuthError::ChallengeNotFound);
        }

        let session = Session::new(address, user_expiry);
        self.sessions.put(session_id, &session)?;

        Ok(Verified {
            address: session.address,
            session_id: session_id.to_string(),
        })
    }

    /// Returns the live session for `session_id`.
    ///
    /// The storage TTL and the user deadline are independent clocks: a
    /// record the store still holds is dropped here once its user deadline
    /// has passed.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.sessions.get(session_id)? else {
            return Ok(None);
        };

        if session.is_user_expired(now_millis()) {
            self.sessions.remove(session_id)?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Deletes a session. Removing an unknown id is not an error.
    pub fn remove_session(&self, session_id: &str) -> Result<(), AuthError> {
        self.sessions.remove(session_id)?;
        Ok(())
    }

    /// Drops expired challenges. Sessions rely on the store's own TTL.
    /// Returns the number of challenges removed.
    pub fn cleanup(&self) -> Result<usize, AuthError> {
        Ok(self.challenges.cleanup_expired(self.challenge_ttl)?)
    }

    /// Runs [`cleanup`](Self::cleanup) with probability
    /// [`CLEANUP_PROBABILITY`].
    pub fn maybe_cleanup(&self) {
        if rand::random::<f64>() < CLEANUP_PROBABILITY {
            match self.cleanup() {
                Ok(0) => {}
                Ok(removed) => debug!("Swept {} expired challenges", removed),
                Err(e) => warn!("Challenge sweep failed: {}", e),
            }
        }
    }

    /// Sweeps expired challenges and session records whose storage TTL
    /// has elapsed. Used by the periodic background task.
    pub fn sweep(&self) -> Result<(usize, usize), AuthError> {
        let challenges = self.cleanup()?;
        let sessions = self.sessions.cleanup_expired()?;
        Ok((challenges, sessions))
    }

    /// Number of outstanding challenges.
    pub fn pending_challenges(&self) -> Result<usize, AuthError> {
        Ok(self.challenges.len()?)
    }
}
