//! In-memory session store for tests and local development.
//!
//! A single mutex over the row maps makes every compound operation the same
//! transactional unit the Postgres store gets from its per-family
//! transaction. Audit appends happen before row mutations so a poisoned
//! audit path (see [`MemorySessionStore::set_audit_fault`]) aborts the whole
//! operation, mirroring the fail-closed contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{AuditEvent, FamilyState, SessionFamily, SessionToken, TokenState};

use super::{SessionStore, StoreError};

#[derive(Default)]
struct Inner {
    families: HashMap<Uuid, SessionFamily>,
    tokens: HashMap<Uuid, SessionToken>,
    events: Vec<AuditEvent>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
    audit_fault: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make every audit append fail, so callers can verify that
    /// state transitions abort rather than commit unaudited.
    pub fn set_audit_fault(&self, enabled: bool) {
        self.audit_fault.store(enabled, Ordering::SeqCst);
    }

    /// Test hook: backdate a generation's `consumed_utc` to step outside (or
    /// further inside) the grace window without sleeping.
    pub fn rewind_consumed(&self, token_id: Uuid, to: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(token) = inner.tokens.get_mut(&token_id) {
            token.consumed_utc = Some(to);
        }
        Ok(())
    }

    /// Test hook: backdate a generation's expiry.
    pub fn rewind_expiry(&self, token_id: Uuid, to: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(token) = inner.tokens.get_mut(&token_id) {
            token.expiry_utc = to;
        }
        Ok(())
    }

    /// Test hook: every recorded event, including family-less ones.
    pub fn events_snapshot(&self) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self.lock()?.events.clone())
    }

    /// Test hook: total persisted generations across all families.
    pub fn token_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.tokens.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("store mutex poisoned: {e}")))
    }

    fn append_event(&self, inner: &mut Inner, event: &AuditEvent) -> Result<(), StoreError> {
        if self.audit_fault.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "audit append rejected by fault injection"
            )));
        }
        inner.events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_family(
        &self,
        family: &SessionFamily,
        first_token: &SessionToken,
        event: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        self.append_event(&mut inner, event)?;
        inner.families.insert(family.family_id, family.clone());
        inner.tokens.insert(first_token.token_id, first_token.clone());
        Ok(())
    }

    async fn find_token_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<(SessionFamily, SessionToken)>, StoreError> {
        let inner = self.lock()?;
        let token = inner
            .tokens
            .values()
            .find(|t| t.matches_hash(secret_hash))
            .cloned();
        let Some(token) = token else {
            return Ok(None);
        };
        let family = inner
            .families
            .get(&token.family_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Unavailable(anyhow::anyhow!(
                    "token {} references missing family {}",
                    token.token_id,
                    token.family_id
                ))
            })?;
        Ok(Some((family, token)))
    }

    async fn find_token(&self, token_id: Uuid) -> Result<Option<SessionToken>, StoreError> {
        Ok(self.lock()?.tokens.get(&token_id).cloned())
    }

    async fn find_family(&self, family_id: Uuid) -> Result<Option<SessionFamily>, StoreError> {
        Ok(self.lock()?.families.get(&family_id).cloned())
    }

    async fn consume_and_replace(
        &self,
        token_id: Uuid,
        consumed_utc: DateTime<Utc>,
        successor: &SessionToken,
        event: &AuditEvent,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.tokens.get(&token_id) {
            Some(token) if token.state == TokenState::Active => {}
            _ => return Ok(false),
        }
        self.append_event(&mut inner, event)?;
        if let Some(token) = inner.tokens.get_mut(&token_id) {
            token.state = TokenState::Consumed;
            token.consumed_utc = Some(consumed_utc);
            token.successor_id = Some(successor.token_id);
        }
        inner.tokens.insert(successor.token_id, successor.clone());
        Ok(true)
    }

    async fn mark_expired(&self, token_id: Uuid, event: &AuditEvent) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.tokens.get(&token_id) {
            Some(token) if token.state == TokenState::Active => {}
            _ => return Ok(false),
        }
        self.append_event(&mut inner, event)?;
        if let Some(token) = inner.tokens.get_mut(&token_id) {
            token.state = TokenState::Dead;
        }
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid, event: &AuditEvent) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        self.append_event(&mut inner, event)?;
        if let Some(family) = inner.families.get_mut(&family_id) {
            family.state = FamilyState::Revoked;
        }
        let mut swept = 0;
        for token in inner.tokens.values_mut() {
            if token.family_id == family_id && token.state != TokenState::Revoked {
                token.state = TokenState::Revoked;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn record_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        self.append_event(&mut inner, event)
    }

    async fn family_tokens(&self, family_id: Uuid) -> Result<Vec<SessionToken>, StoreError> {
        let inner = self.lock()?;
        let mut tokens: Vec<SessionToken> = inner
            .tokens
            .values()
            .filter(|t| t.family_id == family_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.issued_utc);
        Ok(tokens)
    }

    async fn family_events(&self, family_id: Uuid) -> Result<Vec<AuditEvent>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.family_id == Some(family_id))
            .cloned()
            .collect())
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.tokens.len();
        inner.tokens.retain(|_, t| {
            let terminal = matches!(t.state, TokenState::Dead | TokenState::Revoked);
            let stamp = t.consumed_utc.unwrap_or(t.expiry_utc);
            !(terminal && stamp < cutoff)
        });
        let deleted = (before - inner.tokens.len()) as u64;

        let remaining: std::collections::HashSet<Uuid> =
            inner.tokens.values().map(|t| t.family_id).collect();
        inner.families.retain(|id, f| {
            !(f.state == FamilyState::Revoked && f.created_utc < cutoff && !remaining.contains(id))
        });

        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seed(store: &MemorySessionStore) -> (SessionFamily, SessionToken) {
        let now = Utc::now();
        let family = SessionFamily::new(Uuid::new_v4(), Uuid::new_v4(), now);
        let (_, hash) = SessionToken::generate_secret();
        let token = SessionToken::first_generation(
            family.family_id,
            hash,
            now,
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        );
        let event = AuditEvent::issued(family.family_id, token.token_id, "203.0.113.9", "fp");
        store.create_family(&family, &token, &event).await.unwrap();
        (family, token)
    }

    fn successor_for(token: &SessionToken) -> SessionToken {
        let (_, hash) = SessionToken::generate_secret();
        SessionToken::successor_of(
            token,
            hash,
            Utc::now(),
            Duration::days(7),
            "fp".to_string(),
            "203.0.113.9".to_string(),
        )
    }

    #[tokio::test]
    async fn consume_is_conditional_on_active() {
        let store = MemorySessionStore::new();
        let (family, token) = seed(&store).await;
        let now = Utc::now();

        let successor = successor_for(&token);
        let event = AuditEvent::rotated(
            family.family_id,
            token.token_id,
            successor.token_id,
            "203.0.113.9",
            "fp",
        );

        let won = store
            .consume_and_replace(token.token_id, now, &successor, &event)
            .await
            .unwrap();
        assert!(won);

        // A second consume of the same generation must lose.
        let lost = store
            .consume_and_replace(token.token_id, now, &successor, &event)
            .await
            .unwrap();
        assert!(!lost);
    }

    #[tokio::test]
    async fn revoke_sweeps_every_generation() {
        let store = MemorySessionStore::new();
        let (family, token) = seed(&store).await;
        let now = Utc::now();

        let successor = successor_for(&token);
        let rotated = AuditEvent::rotated(
            family.family_id,
            token.token_id,
            successor.token_id,
            "203.0.113.9",
            "fp",
        );
        store
            .consume_and_replace(token.token_id, now, &successor, &rotated)
            .await
            .unwrap();

        let event =
            AuditEvent::reuse_detected(family.family_id, token.token_id, "203.0.113.9", "fp");
        let swept = store.revoke_family(family.family_id, &event).await.unwrap();
        assert_eq!(swept, 2);

        let tokens = store.family_tokens(family.family_id).await.unwrap();
        assert!(tokens.iter().all(|t| t.state == TokenState::Revoked));
    }

    #[tokio::test]
    async fn audit_fault_aborts_the_transition() {
        let store = MemorySessionStore::new();
        let (family, token) = seed(&store).await;
        store.set_audit_fault(true);

        let event =
            AuditEvent::reuse_detected(family.family_id, token.token_id, "203.0.113.9", "fp");
        let result = store.revoke_family(family.family_id, &event).await;
        assert!(result.is_err());

        // Nothing may have committed.
        let tokens = store.family_tokens(family.family_id).await.unwrap();
        assert_eq!(tokens[0].state, TokenState::Active);
    }

    #[tokio::test]
    async fn purge_removes_only_terminal_rows_past_cutoff() {
        let store = MemorySessionStore::new();
        let (family, token) = seed(&store).await;

        let event =
            AuditEvent::revoked(family.family_id, None, "203.0.113.9", "sweep test");
        store.revoke_family(family.family_id, &event).await.unwrap();

        // Cutoff before the rows' timestamps: nothing purged yet.
        let purged = store
            .purge_terminal(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        // Cutoff in the future: terminal rows go, audit trail stays.
        store.rewind_expiry(token.token_id, Utc::now() - Duration::days(60)).unwrap();
        let purged = store
            .purge_terminal(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(!store.family_events(family.family_id).await.unwrap().is_empty());
    }
}
