pub mod audit_event;
pub mod rate_limit;
pub mod session_family;
pub mod session_token;

pub use audit_event::{AuditEvent, AuditEventKind};
pub use rate_limit::{OperationClass, RateLimitKey};
pub use session_family::{FamilyState, SessionFamily};
pub use session_token::{hash_fingerprint, SessionToken, TokenState};
