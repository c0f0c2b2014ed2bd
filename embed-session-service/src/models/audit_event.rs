//! Audit event model - append-only security trail.
//!
//! Events are only ever inserted. `family_id` is nullable because a
//! rate-limited issuance is rejected before any family exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "audit_event_kind", rename_all = "snake_case")]
pub enum AuditEventKind {
    Issued,
    Rotated,
    ReuseDetected,
    Revoked,
    RateLimited,
    Expired,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Issued => "issued",
            AuditEventKind::Rotated => "rotated",
            AuditEventKind::ReuseDetected => "reuse_detected",
            AuditEventKind::Revoked => "revoked",
            AuditEventKind::RateLimited => "rate_limited",
            AuditEventKind::Expired => "expired",
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub family_id: Option<Uuid>,
    pub token_id: Option<Uuid>,
    pub kind: AuditEventKind,
    pub severity: String,
    pub network_addr: String,
    pub fingerprint_hash: String,
    pub detail: String,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    #[allow(clippy::too_many_arguments)]
    fn new(
        kind: AuditEventKind,
        severity: &str,
        family_id: Option<Uuid>,
        token_id: Option<Uuid>,
        network_addr: impl Into<String>,
        fingerprint_hash: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            family_id,
            token_id,
            kind,
            severity: severity.to_string(),
            network_addr: network_addr.into(),
            fingerprint_hash: fingerprint_hash.into(),
            detail: detail.into(),
            created_utc: Utc::now(),
        }
    }

    /// First issuance of a new family.
    pub fn issued(
        family_id: Uuid,
        token_id: Uuid,
        network_addr: &str,
        fingerprint_hash: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::Issued,
            "info",
            Some(family_id),
            Some(token_id),
            network_addr,
            fingerprint_hash,
            "new session family issued",
        )
    }

    /// Successful rotation: `consumed` superseded by `successor`.
    pub fn rotated(
        family_id: Uuid,
        consumed_id: Uuid,
        successor_id: Uuid,
        network_addr: &str,
        fingerprint_hash: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::Rotated,
            "info",
            Some(family_id),
            Some(consumed_id),
            network_addr,
            fingerprint_hash,
            format!("rotated to successor {}", successor_id),
        )
    }

    /// Benign grace-window replay; the existing successor pair was returned.
    pub fn replayed(
        family_id: Uuid,
        token_id: Uuid,
        network_addr: &str,
        fingerprint_hash: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::Issued,
            "info",
            Some(family_id),
            Some(token_id),
            network_addr,
            fingerprint_hash,
            "grace-window replay; existing successor pair returned",
        )
    }

    /// Token replay outside any legitimate window; the family cascades.
    pub fn reuse_detected(
        family_id: Uuid,
        token_id: Uuid,
        network_addr: &str,
        fingerprint_hash: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::ReuseDetected,
            "critical",
            Some(family_id),
            Some(token_id),
            network_addr,
            fingerprint_hash,
            "consumed or dead token re-presented; family revoked",
        )
    }

    /// Explicit sign-out or administrative termination.
    pub fn revoked(
        family_id: Uuid,
        token_id: Option<Uuid>,
        network_addr: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            AuditEventKind::Revoked,
            "warning",
            Some(family_id),
            token_id,
            network_addr,
            "",
            detail,
        )
    }

    /// Admission denied by the domain rate limiter.
    pub fn rate_limited(
        family_id: Option<Uuid>,
        token_id: Option<Uuid>,
        network_addr: &str,
        fingerprint_hash: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            AuditEventKind::RateLimited,
            "warning",
            family_id,
            token_id,
            network_addr,
            fingerprint_hash,
            detail,
        )
    }

    /// An active token was presented past its own expiry.
    pub fn expired(
        family_id: Uuid,
        token_id: Uuid,
        network_addr: &str,
        fingerprint_hash: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::Expired,
            "info",
            Some(family_id),
            Some(token_id),
            network_addr,
            fingerprint_hash,
            "refresh token presented past expiry",
        )
    }

    /// Emit the event to the tracing pipeline at a level matching severity.
    pub fn trace(&self) {
        match self.severity.as_str() {
            "critical" => tracing::error!(
                kind = self.kind.as_str(),
                family_id = ?self.family_id,
                token_id = ?self.token_id,
                network_addr = %self.network_addr,
                detail = %self.detail,
                "Security event"
            ),
            "warning" => tracing::warn!(
                kind = self.kind.as_str(),
                family_id = ?self.family_id,
                token_id = ?self.token_id,
                network_addr = %self.network_addr,
                detail = %self.detail,
                "Security event"
            ),
            _ => tracing::info!(
                kind = self.kind.as_str(),
                family_id = ?self.family_id,
                token_id = ?self.token_id,
                detail = %self.detail,
                "Session event"
            ),
        }
    }
}
