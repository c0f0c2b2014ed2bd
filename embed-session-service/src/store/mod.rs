//! Durable storage for session families, tokens, and the audit trail.
//!
//! The store exclusively owns all persisted rows. Compound operations are
//! transactional per family and carry their audit event, so a state
//! transition can never commit without its audit record.

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AuditEvent, SessionFamily, SessionToken};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new family with its first generation and the `Issued` event
    /// as one transaction.
    async fn create_family(
        &self,
        family: &SessionFamily,
        first_token: &SessionToken,
        event: &AuditEvent,
    ) -> Result<(), StoreError>;

    /// Resolve a presented secret hash to its generation and owning family.
    async fn find_token_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<(SessionFamily, SessionToken)>, StoreError>;

    async fn find_token(&self, token_id: Uuid) -> Result<Option<SessionToken>, StoreError>;

    async fn find_family(&self, family_id: Uuid) -> Result<Option<SessionFamily>, StoreError>;

    /// The winning half of a rotation: one conditional update moves the
    /// presented generation `Active -> Consumed` (stamping `consumed_utc` and
    /// the successor link), inserts the successor row, and appends the
    /// `Rotated` event - all in one transaction.
    ///
    /// Returns `false` without writing anything when the generation was no
    /// longer `Active`, i.e. this call lost the optimistic race.
    async fn consume_and_replace(
        &self,
        token_id: Uuid,
        consumed_utc: DateTime<Utc>,
        successor: &SessionToken,
        event: &AuditEvent,
    ) -> Result<bool, StoreError>;

    /// Conditional `Active -> Dead` for a generation presented past its own
    /// expiry, with its `Expired` event.
    async fn mark_expired(&self, token_id: Uuid, event: &AuditEvent) -> Result<bool, StoreError>;

    /// Revoke the family and every generation in it with one indexed sweep,
    /// appending the given event in the same transaction. Returns the number
    /// of token rows swept.
    async fn revoke_family(&self, family_id: Uuid, event: &AuditEvent) -> Result<u64, StoreError>;

    /// Append a standalone audit event (rate-limit denials, replay notes).
    async fn record_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// All generations of a family, oldest first.
    async fn family_tokens(&self, family_id: Uuid) -> Result<Vec<SessionToken>, StoreError>;

    /// The family's audit trail, oldest first.
    async fn family_events(&self, family_id: Uuid) -> Result<Vec<AuditEvent>, StoreError>;

    /// Maintenance sweep: delete `Dead`/`Revoked` generations older than the
    /// cutoff, plus fully-swept revoked families. Audit rows are never
    /// touched. Returns the number of token rows deleted.
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
