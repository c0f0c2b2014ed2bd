//! Session token model - one refresh-token generation within a family.
//!
//! Refresh secrets are opaque random strings; only their SHA-256 hash is
//! stored server-side so a database leak does not compromise live sessions.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Per-generation lifecycle state.
///
/// `Dead` and `Revoked` are absorbing: no token ever leaves them. `Dead` is
/// the benign terminal (expiry or superseded past grace after cleanup);
/// `Revoked` means the whole family was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "token_state", rename_all = "lowercase")]
pub enum TokenState {
    Active,
    Consumed,
    Dead,
    Revoked,
}

/// One refresh-token generation.
#[derive(Debug, Clone, FromRow)]
pub struct SessionToken {
    pub token_id: Uuid,
    pub family_id: Uuid,
    pub secret_hash: String,
    pub state: TokenState,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub successor_id: Option<Uuid>,
    pub fingerprint_hash: String,
    pub network_addr: String,
}

impl SessionToken {
    /// The first generation of a brand-new family.
    pub fn first_generation(
        family_id: Uuid,
        secret_hash: String,
        now: DateTime<Utc>,
        ttl: Duration,
        fingerprint_hash: String,
        network_addr: String,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            family_id,
            secret_hash,
            state: TokenState::Active,
            issued_utc: now,
            expiry_utc: now + ttl,
            consumed_utc: None,
            successor_id: None,
            fingerprint_hash,
            network_addr,
        }
    }

    /// The next generation in an existing family, minted on rotation.
    pub fn successor_of(
        predecessor: &SessionToken,
        secret_hash: String,
        now: DateTime<Utc>,
        ttl: Duration,
        fingerprint_hash: String,
        network_addr: String,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            family_id: predecessor.family_id,
            secret_hash,
            state: TokenState::Active,
            issued_utc: now,
            expiry_utc: now + ttl,
            consumed_utc: None,
            successor_id: None,
            fingerprint_hash,
            network_addr,
        }
    }

    /// Generate a fresh 256-bit opaque refresh secret.
    ///
    /// Returns `(plaintext, sha256_hex)`. The plaintext goes to the client;
    /// only the hash is ever persisted.
    pub fn generate_secret() -> (String, String) {
        let mut rng = rand::thread_rng();
        let secret_bytes: [u8; 32] = rng.gen();
        let plaintext = hex::encode(secret_bytes);
        let hash = Self::hash_secret(&plaintext);
        (plaintext, hash)
    }

    /// SHA-256 hex digest of a refresh secret.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time comparison against a presented secret hash.
    pub fn matches_hash(&self, presented_hash: &str) -> bool {
        self.secret_hash
            .as_bytes()
            .ct_eq(presented_hash.as_bytes())
            .into()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}

/// SHA-256 hex digest of the raw client fingerprint.
///
/// Only the digest is stored; it supports anomaly review and is never an
/// authentication factor on its own.
pub fn hash_fingerprint(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_hashes_consistently() {
        let (plaintext, hash) = SessionToken::generate_secret();
        assert_eq!(plaintext.len(), 64);
        assert_eq!(hash.len(), 64);
        assert_eq!(SessionToken::hash_secret(&plaintext), hash);
        assert_ne!(plaintext, hash);
    }

    #[test]
    fn first_generation_starts_active_and_unlinked() {
        let now = Utc::now();
        let token = SessionToken::first_generation(
            Uuid::new_v4(),
            "hash".to_string(),
            now,
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        );
        assert_eq!(token.state, TokenState::Active);
        assert!(token.consumed_utc.is_none());
        assert!(token.successor_id.is_none());
        assert_eq!(token.expiry_utc, now + Duration::days(7));
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::days(8)));
    }

    #[test]
    fn successor_inherits_family() {
        let now = Utc::now();
        let first = SessionToken::first_generation(
            Uuid::new_v4(),
            "hash-a".to_string(),
            now,
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        );
        let next = SessionToken::successor_of(
            &first,
            "hash-b".to_string(),
            now,
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        );
        assert_eq!(next.family_id, first.family_id);
        assert_ne!(next.token_id, first.token_id);
        assert_eq!(next.state, TokenState::Active);
    }

    #[test]
    fn hash_comparison_is_exact() {
        let (plaintext, _) = SessionToken::generate_secret();
        let token = SessionToken::first_generation(
            Uuid::new_v4(),
            SessionToken::hash_secret(&plaintext),
            Utc::now(),
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        );
        assert!(token.matches_hash(&SessionToken::hash_secret(&plaintext)));
        assert!(!token.matches_hash(&SessionToken::hash_secret("other")));
    }
}
