//! Services layer for the embedded-session core.
//!
//! The issuer is the single entry point for callers; rotation, admission,
//! and auditing hang off it.

mod audit;
pub mod error;
mod issuer;
mod limiter;
mod replay;
mod rotation;
mod tokens;

pub use audit::AuditLog;
pub use error::ServiceError;
pub use issuer::SessionIssuer;
pub use limiter::{Admission, ClassQuota, FixedWindowLimiter, QuotaSettings};
pub use replay::{MemoryReplayCache, RedisReplayCache, ReplayCache};
pub use rotation::{is_reuse, RotationEngine};
pub use tokens::{AccessClaims, AccessTokenMinter, SessionTokenPair};
