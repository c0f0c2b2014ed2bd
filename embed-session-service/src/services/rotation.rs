//! Refresh-token rotation: the per-generation state machine.
//!
//! ```text
//! Active --rotate(success)--> Consumed --grace elapses--> Dead
//! Active --expiry elapses--> Dead
//! Consumed --replay within grace--> Consumed (same successor pair returned)
//! Consumed --replay past grace--> Revoked (whole family cascades)
//! Dead --any presentation--> Revoked (whole family cascades)
//! ```
//!
//! Concurrent rotations of the same generation race on one conditional
//! update; the loser lands in the grace-window branch and is answered with
//! the winner's pair from the replay cache.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::{
    hash_fingerprint, AuditEvent, OperationClass, RateLimitKey, SessionFamily, SessionToken,
    TokenState,
};
use crate::store::SessionStore;

use super::{
    audit::AuditLog,
    limiter::{Admission, FixedWindowLimiter},
    replay::ReplayCache,
    tokens::{AccessTokenMinter, SessionTokenPair},
    ServiceError,
};

/// How many times the loser of a rotation race polls the replay cache for
/// the winner's pair before giving up, and the pause between polls.
const REPLAY_FETCH_ATTEMPTS: u32 = 4;
const REPLAY_FETCH_BACKOFF_MS: u64 = 25;

/// Pure reuse predicate, split out so the decision table is testable without
/// the engine's side effects.
///
/// A token is being reused when it is already terminal, or when it was
/// consumed and its own grace window has elapsed. Each generation tracks its
/// own window; a long-lived family does not compound grace.
pub fn is_reuse(
    state: TokenState,
    consumed_utc: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    match state {
        TokenState::Dead | TokenState::Revoked => true,
        TokenState::Consumed => match consumed_utc {
            Some(consumed) => now - consumed > grace,
            // A consumed token without a stamp is corrupt; treat as hostile.
            None => true,
        },
        TokenState::Active => false,
    }
}

#[derive(Clone)]
pub struct RotationEngine {
    store: Arc<dyn SessionStore>,
    replay: Arc<dyn ReplayCache>,
    minter: AccessTokenMinter,
    limiter: Arc<FixedWindowLimiter>,
    audit: AuditLog,
    refresh_ttl: Duration,
    grace: Duration,
}

impl RotationEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        replay: Arc<dyn ReplayCache>,
        minter: AccessTokenMinter,
        limiter: Arc<FixedWindowLimiter>,
        audit: AuditLog,
        config: &TokenConfig,
    ) -> Self {
        Self {
            store,
            replay,
            minter,
            limiter,
            audit,
            refresh_ttl: Duration::days(config.refresh_ttl_days),
            grace: Duration::seconds(config.rotation_grace_seconds),
        }
    }

    /// Validate a presented refresh token and produce the next pair.
    pub async fn rotate(
        &self,
        presented_secret: &str,
        fingerprint: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        let now = Utc::now();
        let fingerprint_hash = hash_fingerprint(fingerprint);
        let secret_hash = SessionToken::hash_secret(presented_secret);

        let Some((family, token)) = self.store.find_token_by_secret_hash(&secret_hash).await?
        else {
            // Unknown credential: throttle guessing per source address.
            if let Admission::Limited { retry_after_secs } = self
                .limiter
                .admit(RateLimitKey::anonymous(network_addr), OperationClass::FailedAuth)
            {
                self.audit
                    .record(AuditEvent::rate_limited(
                        None,
                        None,
                        network_addr,
                        &fingerprint_hash,
                        "failed-auth throttle tripped on unknown refresh token",
                    ))
                    .await?;
                return Err(ServiceError::RateLimitExceeded { retry_after_secs });
            }
            return Err(ServiceError::InvalidToken);
        };

        // Admission precedes every read-modify path, keyed by the resolved
        // principal.
        let key = RateLimitKey::new(family.workspace_id, family.subject_id, network_addr);
        if let Admission::Limited { retry_after_secs } =
            self.limiter.admit(key, OperationClass::Rotate)
        {
            self.audit
                .record(AuditEvent::rate_limited(
                    Some(family.family_id),
                    Some(token.token_id),
                    network_addr,
                    &fingerprint_hash,
                    "rotate admission denied",
                ))
                .await?;
            return Err(ServiceError::RateLimitExceeded { retry_after_secs });
        }

        // A revoked family answers exactly like an unknown token, so the
        // response cannot reveal whether reuse detection fired earlier.
        if family.is_revoked() || token.state == TokenState::Revoked {
            return Err(ServiceError::InvalidToken);
        }

        if token.fingerprint_hash != fingerprint_hash {
            tracing::warn!(
                family_id = %family.family_id,
                token_id = %token.token_id,
                network_addr = %network_addr,
                "Fingerprint changed between generations"
            );
        }

        match token.state {
            TokenState::Active if token.is_expired_at(now) => {
                let event = AuditEvent::expired(
                    family.family_id,
                    token.token_id,
                    network_addr,
                    &fingerprint_hash,
                );
                if self.store.mark_expired(token.token_id, &event).await? {
                    event.trace();
                }
                Err(ServiceError::ExpiredToken)
            }
            TokenState::Active => {
                self.try_consume(&family, &token, now, &fingerprint_hash, network_addr)
                    .await
            }
            TokenState::Consumed => {
                self.handle_consumed(&family, &token, now, &fingerprint_hash, network_addr)
                    .await
            }
            TokenState::Dead => {
                self.revoke_for_reuse(&family, &token, &fingerprint_hash, network_addr)
                    .await
            }
            // Unreachable: handled with the family check above.
            TokenState::Revoked => Err(ServiceError::InvalidToken),
        }
    }

    /// The expected path: atomically consume the presented generation and
    /// mint its successor.
    async fn try_consume(
        &self,
        family: &SessionFamily,
        token: &SessionToken,
        now: DateTime<Utc>,
        fingerprint_hash: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        let (refresh_secret, refresh_hash) = SessionToken::generate_secret();
        let successor = SessionToken::successor_of(
            token,
            refresh_hash,
            now,
            self.refresh_ttl,
            fingerprint_hash.to_string(),
            network_addr.to_string(),
        );
        let (access_token, access_expires) = self
            .minter
            .mint(family, successor.token_id, now)
            .map_err(ServiceError::Internal)?;

        let event = AuditEvent::rotated(
            family.family_id,
            token.token_id,
            successor.token_id,
            network_addr,
            fingerprint_hash,
        );

        let won = self
            .store
            .consume_and_replace(token.token_id, now, &successor, &event)
            .await?;

        if !won {
            // Lost the race: the winner already consumed this generation.
            let token = self
                .store
                .find_token(token.token_id)
                .await?
                .ok_or(ServiceError::InvalidToken)?;
            return self
                .handle_consumed(family, &token, Utc::now(), fingerprint_hash, network_addr)
                .await;
        }

        event.trace();

        let pair = SessionTokenPair {
            access_token,
            refresh_token: refresh_secret,
            token_type: "Bearer".to_string(),
            access_expires_utc: access_expires,
            refresh_expires_utc: successor.expiry_utc,
        };

        // Best effort: a lost cache entry only turns a benign replay into a
        // re-auth, so rotation does not fail on it.
        if let Err(e) = self
            .replay
            .put_pair(token.token_id, &pair, self.grace.num_seconds())
            .await
        {
            tracing::warn!(
                token_id = %token.token_id,
                error = %e,
                "Failed to cache rotation pair for grace-window replay"
            );
        }

        Ok(pair)
    }

    /// A consumed generation was presented: benign replay inside its grace
    /// window, reuse beyond it.
    async fn handle_consumed(
        &self,
        family: &SessionFamily,
        token: &SessionToken,
        now: DateTime<Utc>,
        fingerprint_hash: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        if is_reuse(token.state, token.consumed_utc, now, self.grace) {
            return self
                .revoke_for_reuse(family, token, fingerprint_hash, network_addr)
                .await;
        }

        // Idempotent replay: hand back the winner's pair. The cache write can
        // trail the winning commit by an instant, hence the short poll.
        for attempt in 0..REPLAY_FETCH_ATTEMPTS {
            match self.replay.fetch_pair(token.token_id).await {
                Ok(Some(pair)) => {
                    self.audit
                        .record(AuditEvent::replayed(
                            family.family_id,
                            token.token_id,
                            network_addr,
                            fingerprint_hash,
                        ))
                        .await?;
                    return Ok(pair);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(token_id = %token.token_id, error = %e, "Replay cache fetch failed");
                }
            }
            if attempt + 1 < REPLAY_FETCH_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(REPLAY_FETCH_BACKOFF_MS))
                    .await;
            }
        }

        // The pair is gone (cache loss or restart). Within grace this is not
        // evidence of an attack; the caller re-authenticates upstream.
        tracing::info!(
            family_id = %family.family_id,
            token_id = %token.token_id,
            "Grace-window replay had no cached pair; requiring re-authentication"
        );
        Err(ServiceError::InvalidToken)
    }

    /// Reuse verdict: revoke the whole family in one sweep.
    async fn revoke_for_reuse(
        &self,
        family: &SessionFamily,
        token: &SessionToken,
        fingerprint_hash: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        let event = AuditEvent::reuse_detected(
            family.family_id,
            token.token_id,
            network_addr,
            fingerprint_hash,
        );
        self.store.revoke_family(family.family_id, &event).await?;
        event.trace();
        Err(ServiceError::ReuseDetected)
    }
}
