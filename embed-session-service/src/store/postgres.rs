//! PostgreSQL-backed session store.
//!
//! All conditional updates key on the current row state so concurrent
//! rotations cannot double-consume a generation, and every compound
//! operation appends its audit event inside the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use uuid::Uuid;

use crate::models::{AuditEvent, SessionFamily, SessionToken, TokenState};

use super::{SessionStore, StoreError};

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_token_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        token: &SessionToken,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO session_tokens
                (token_id, family_id, secret_hash, state, issued_utc, expiry_utc,
                 consumed_utc, successor_id, fingerprint_hash, network_addr)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(token.token_id)
        .bind(token.family_id)
        .bind(&token.secret_hash)
        .bind(token.state)
        .bind(token.issued_utc)
        .bind(token.expiry_utc)
        .bind(token.consumed_utc)
        .bind(token.successor_id)
        .bind(&token.fingerprint_hash)
        .bind(&token.network_addr)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_event_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        event: &AuditEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO session_audit_events
                (event_id, family_id, token_id, kind, severity, network_addr,
                 fingerprint_hash, detail, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id)
        .bind(event.family_id)
        .bind(event.token_id)
        .bind(event.kind)
        .bind(&event.severity)
        .bind(&event.network_addr)
        .bind(&event.fingerprint_hash)
        .bind(&event.detail)
        .bind(event.created_utc)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_family(
        &self,
        family: &SessionFamily,
        first_token: &SessionToken,
        event: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO session_families (family_id, workspace_id, subject_id, state, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(family.family_id)
        .bind(family.workspace_id)
        .bind(family.subject_id)
        .bind(family.state)
        .bind(family.created_utc)
        .execute(&mut *tx)
        .await?;

        Self::insert_token_tx(&mut tx, first_token).await?;
        Self::insert_event_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_token_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<(SessionFamily, SessionToken)>, StoreError> {
        let token = sqlx::query_as::<_, SessionToken>(
            "SELECT * FROM session_tokens WHERE secret_hash = $1",
        )
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(token) = token else {
            return Ok(None);
        };

        let family = sqlx::query_as::<_, SessionFamily>(
            "SELECT * FROM session_families WHERE family_id = $1",
        )
        .bind(token.family_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some((family, token)))
    }

    async fn find_token(&self, token_id: Uuid) -> Result<Option<SessionToken>, StoreError> {
        let token =
            sqlx::query_as::<_, SessionToken>("SELECT * FROM session_tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token)
    }

    async fn find_family(&self, family_id: Uuid) -> Result<Option<SessionFamily>, StoreError> {
        let family = sqlx::query_as::<_, SessionFamily>(
            "SELECT * FROM session_families WHERE family_id = $1",
        )
        .bind(family_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(family)
    }

    async fn consume_and_replace(
        &self,
        token_id: Uuid,
        consumed_utc: DateTime<Utc>,
        successor: &SessionToken,
        event: &AuditEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE session_tokens
            SET state = $2, consumed_utc = $3, successor_id = $4
            WHERE token_id = $1 AND state = 'active'
            "#,
        )
        .bind(token_id)
        .bind(TokenState::Consumed)
        .bind(consumed_utc)
        .bind(successor.token_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_token_tx(&mut tx, successor).await?;
        Self::insert_event_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_expired(&self, token_id: Uuid, event: &AuditEvent) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE session_tokens SET state = $2 WHERE token_id = $1 AND state = 'active'",
        )
        .bind(token_id)
        .bind(TokenState::Dead)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_event_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid, event: &AuditEvent) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE session_families SET state = 'revoked' WHERE family_id = $1 AND state = 'active'",
        )
        .bind(family_id)
        .execute(&mut *tx)
        .await?;

        // One indexed sweep over the whole chain, never a successor walk.
        let swept = sqlx::query(
            "UPDATE session_tokens SET state = 'revoked' WHERE family_id = $1 AND state <> 'revoked'",
        )
        .bind(family_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        Self::insert_event_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(swept)
    }

    async fn record_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_event_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn family_tokens(&self, family_id: Uuid) -> Result<Vec<SessionToken>, StoreError> {
        let tokens = sqlx::query_as::<_, SessionToken>(
            "SELECT * FROM session_tokens WHERE family_id = $1 ORDER BY issued_utc",
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn family_events(&self, family_id: Uuid) -> Result<Vec<AuditEvent>, StoreError> {
        let events = sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM session_audit_events WHERE family_id = $1 ORDER BY created_utc",
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM session_tokens
            WHERE state IN ('dead', 'revoked')
              AND COALESCE(consumed_utc, expiry_utc) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM session_families f
            WHERE f.state = 'revoked'
              AND f.created_utc < $1
              AND NOT EXISTS (
                  SELECT 1 FROM session_tokens t WHERE t.family_id = f.family_id
              )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
