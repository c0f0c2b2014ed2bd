//! Session family model - the unit of trust and of revocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Family lifecycle state.
///
/// A family is the full chain of refresh-token generations descended from one
/// initial issuance. Revocation is terminal: no token in a revoked family can
/// ever be validated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "family_state", rename_all = "lowercase")]
pub enum FamilyState {
    Active,
    Revoked,
}

/// Session family entity.
#[derive(Debug, Clone, FromRow)]
pub struct SessionFamily {
    pub family_id: Uuid,
    pub workspace_id: Uuid,
    pub subject_id: Uuid,
    pub state: FamilyState,
    pub created_utc: DateTime<Utc>,
}

impl SessionFamily {
    /// Create a new active family for an embedding principal.
    pub fn new(workspace_id: Uuid, subject_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            family_id: Uuid::new_v4(),
            workspace_id,
            subject_id,
            state: FamilyState::Active,
            created_utc: now,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.state == FamilyState::Revoked
    }
}
