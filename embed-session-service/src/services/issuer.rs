//! Session issuance and explicit revocation.
//!
//! The issuer is the only entry point callers see: it creates new families,
//! front-ends the rotation engine for subsequent generations, and handles
//! sign-out. Duplicate-family protection on network retries of the very
//! first issuance is a caller contract (client-generated idempotency key),
//! not enforced here.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::{
    hash_fingerprint, AuditEvent, OperationClass, RateLimitKey, SessionFamily, SessionToken,
};
use crate::store::SessionStore;

use super::{
    audit::AuditLog,
    limiter::{Admission, FixedWindowLimiter},
    rotation::RotationEngine,
    tokens::{AccessTokenMinter, SessionTokenPair},
    ServiceError,
};

#[derive(Clone)]
pub struct SessionIssuer {
    store: Arc<dyn SessionStore>,
    rotation: RotationEngine,
    minter: AccessTokenMinter,
    limiter: Arc<FixedWindowLimiter>,
    audit: AuditLog,
    refresh_ttl: Duration,
}

impl SessionIssuer {
    pub fn new(
        store: Arc<dyn SessionStore>,
        rotation: RotationEngine,
        minter: AccessTokenMinter,
        limiter: Arc<FixedWindowLimiter>,
        audit: AuditLog,
        config: &TokenConfig,
    ) -> Self {
        Self {
            store,
            rotation,
            minter,
            limiter,
            audit,
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }

    /// Create a new session family and its first token pair.
    pub async fn issue(
        &self,
        workspace_id: Uuid,
        subject_id: Uuid,
        fingerprint: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        let now = Utc::now();
        let fingerprint_hash = hash_fingerprint(fingerprint);

        let key = RateLimitKey::new(workspace_id, subject_id, network_addr);
        if let Admission::Limited { retry_after_secs } =
            self.limiter.admit(key, OperationClass::Issue)
        {
            // Denied before any family exists; the audit record carries the
            // context without one.
            self.audit
                .record(AuditEvent::rate_limited(
                    None,
                    None,
                    network_addr,
                    &fingerprint_hash,
                    "issue admission denied",
                ))
                .await?;
            return Err(ServiceError::RateLimitExceeded { retry_after_secs });
        }

        let family = SessionFamily::new(workspace_id, subject_id, now);
        let (refresh_secret, refresh_hash) = SessionToken::generate_secret();
        let token = SessionToken::first_generation(
            family.family_id,
            refresh_hash,
            now,
            self.refresh_ttl,
            fingerprint_hash.clone(),
            network_addr.to_string(),
        );
        let (access_token, access_expires) = self
            .minter
            .mint(&family, token.token_id, now)
            .map_err(ServiceError::Internal)?;

        let event = AuditEvent::issued(
            family.family_id,
            token.token_id,
            network_addr,
            &fingerprint_hash,
        );
        self.store.create_family(&family, &token, &event).await?;
        event.trace();

        tracing::info!(
            family_id = %family.family_id,
            workspace_id = %workspace_id,
            subject_id = %subject_id,
            "Session family issued"
        );

        Ok(SessionTokenPair {
            access_token,
            refresh_token: refresh_secret,
            token_type: "Bearer".to_string(),
            access_expires_utc: access_expires,
            refresh_expires_utc: token.expiry_utc,
        })
    }

    /// Rotate a presented refresh token into the next generation.
    pub async fn rotate(
        &self,
        presented_secret: &str,
        fingerprint: &str,
        network_addr: &str,
    ) -> Result<SessionTokenPair, ServiceError> {
        self.rotation
            .rotate(presented_secret, fingerprint, network_addr)
            .await
    }

    /// Explicit sign-out by family id. Idempotent: revoking an unknown or
    /// already-revoked family is a no-op success.
    pub async fn revoke_family(
        &self,
        family_id: Uuid,
        network_addr: &str,
    ) -> Result<(), ServiceError> {
        let Some(family) = self.store.find_family(family_id).await? else {
            return Ok(());
        };
        if family.is_revoked() {
            return Ok(());
        }
        self.revoke(&family, None, network_addr, "explicit sign-out by family id")
            .await
    }

    /// Explicit sign-out by presented refresh token. Idempotent like
    /// [`Self::revoke_family`].
    pub async fn revoke_presented(
        &self,
        presented_secret: &str,
        network_addr: &str,
    ) -> Result<(), ServiceError> {
        let secret_hash = SessionToken::hash_secret(presented_secret);
        let Some((family, token)) = self.store.find_token_by_secret_hash(&secret_hash).await?
        else {
            return Ok(());
        };
        if family.is_revoked() {
            return Ok(());
        }
        self.revoke(
            &family,
            Some(token.token_id),
            network_addr,
            "explicit sign-out by refresh token",
        )
        .await
    }

    async fn revoke(
        &self,
        family: &SessionFamily,
        token_id: Option<Uuid>,
        network_addr: &str,
        detail: &str,
    ) -> Result<(), ServiceError> {
        let event = AuditEvent::revoked(family.family_id, token_id, network_addr, detail);
        let swept = self.store.revoke_family(family.family_id, &event).await?;
        event.trace();
        tracing::info!(
            family_id = %family.family_id,
            swept,
            "Session family revoked"
        );
        Ok(())
    }

    /// Maintenance sweep for terminal rows past the retention horizon.
    pub async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        Ok(self.store.purge_terminal(cutoff).await?)
    }
}
