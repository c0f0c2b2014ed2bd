//! Rate-limit keying for domain admission control.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation classes with independently configured quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Issue,
    Rotate,
    FailedAuth,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Issue => "issue",
            OperationClass::Rotate => "rotate",
            OperationClass::FailedAuth => "failed_auth",
        }
    }
}

/// Admission key: who is acting, from where.
///
/// Unknown-credential attempts carry nil workspace/subject components so
/// guessing is still throttled per network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub workspace_id: Uuid,
    pub subject_id: Uuid,
    pub network_addr: String,
}

impl RateLimitKey {
    pub fn new(workspace_id: Uuid, subject_id: Uuid, network_addr: &str) -> Self {
        Self {
            workspace_id,
            subject_id,
            network_addr: network_addr.to_string(),
        }
    }

    /// Key for attempts whose principal could not be resolved.
    pub fn anonymous(network_addr: &str) -> Self {
        Self::new(Uuid::nil(), Uuid::nil(), network_addr)
    }
}
