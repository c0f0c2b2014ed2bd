//! Append-only audit recording.
//!
//! Transition-coupled events (`Issued`, `Rotated`, `Expired`, `Revoked`,
//! `ReuseDetected`) ride the store transaction that commits the transition;
//! this service records the standalone ones and owns the tracing emission.
//! There is no update or delete path, here or in the store.

use std::sync::Arc;

use crate::models::AuditEvent;
use crate::store::{SessionStore, StoreError};

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn SessionStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Durably append a standalone event.
    ///
    /// Fails closed: if the append cannot be persisted the caller must abort
    /// whatever it was about to do.
    pub async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        event.trace();
        self.store.record_event(&event).await
    }
}
