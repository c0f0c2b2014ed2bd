//! Fixed-window admission control per (workspace, subject, address, class).
//!
//! Counters live in-process: losing them on restart is an accepted
//! availability/security tradeoff, unlike token-state transitions which are
//! always durable. The rejected call still increments its counter, so the
//! limiter itself cannot be starved into resetting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::models::{OperationClass, RateLimitKey};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Quota for one operation class.
#[derive(Debug, Clone, Copy)]
pub struct ClassQuota {
    pub max_count: u32,
    pub window_seconds: u64,
}

/// Per-class quotas.
#[derive(Debug, Clone, Copy)]
pub struct QuotaSettings {
    pub issue: ClassQuota,
    pub rotate: ClassQuota,
    pub failed_auth: ClassQuota,
}

impl From<&RateLimitConfig> for QuotaSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            issue: ClassQuota {
                max_count: config.issue_max,
                window_seconds: config.issue_window_seconds,
            },
            rotate: ClassQuota {
                max_count: config.rotate_max,
                window_seconds: config.rotate_window_seconds,
            },
            failed_auth: ClassQuota {
                max_count: config.failed_auth_max,
                window_seconds: config.failed_auth_window_seconds,
            },
        }
    }
}

struct Window {
    start_epoch: i64,
    count: u32,
}

/// Keyed fixed-window counter store.
pub struct FixedWindowLimiter {
    quotas: QuotaSettings,
    counters: DashMap<(RateLimitKey, OperationClass), Window>,
}

impl FixedWindowLimiter {
    pub fn new(quotas: QuotaSettings) -> Self {
        Self {
            quotas,
            counters: DashMap::new(),
        }
    }

    fn quota(&self, class: OperationClass) -> ClassQuota {
        match class {
            OperationClass::Issue => self.quotas.issue,
            OperationClass::Rotate => self.quotas.rotate,
            OperationClass::FailedAuth => self.quotas.failed_auth,
        }
    }

    /// Admit or reject one attempt, counting it either way.
    pub fn admit(&self, key: RateLimitKey, class: OperationClass) -> Admission {
        self.admit_at(key, class, Utc::now())
    }

    /// Deterministic admission for a given instant.
    ///
    /// Windows are aligned to epoch multiples of the window size; a new
    /// window resets the count to zero with no partial decay. The increment
    /// happens under the map entry's shard lock, so concurrent attempts for
    /// the same key never lose counts.
    pub fn admit_at(
        &self,
        key: RateLimitKey,
        class: OperationClass,
        now: DateTime<Utc>,
    ) -> Admission {
        let quota = self.quota(class);
        let window = quota.window_seconds.max(1) as i64;
        let now_epoch = now.timestamp();
        let window_start = now_epoch - now_epoch.rem_euclid(window);

        let mut entry = self.counters.entry((key, class)).or_insert(Window {
            start_epoch: window_start,
            count: 0,
        });

        if entry.start_epoch != window_start {
            entry.start_epoch = window_start;
            entry.count = 0;
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > quota.max_count {
            let retry_after = (entry.start_epoch + window - now_epoch).max(1) as u64;
            Admission::Limited {
                retry_after_secs: retry_after,
            }
        } else {
            Admission::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn limiter(max_count: u32, window_seconds: u64) -> FixedWindowLimiter {
        let quota = ClassQuota {
            max_count,
            window_seconds,
        };
        FixedWindowLimiter::new(QuotaSettings {
            issue: quota,
            rotate: quota,
            failed_auth: quota,
        })
    }

    fn key() -> RateLimitKey {
        RateLimitKey::new(Uuid::new_v4(), Uuid::new_v4(), "203.0.113.9")
    }

    #[test]
    fn rejects_the_call_after_max_within_one_window() {
        let limiter = limiter(10, 60);
        let key = key();
        let at = Utc.timestamp_opt(1_700_000_100, 0).unwrap();

        for _ in 0..10 {
            assert_eq!(
                limiter.admit_at(key.clone(), OperationClass::Issue, at),
                Admission::Allowed
            );
        }
        assert!(matches!(
            limiter.admit_at(key.clone(), OperationClass::Issue, at),
            Admission::Limited { .. }
        ));
    }

    #[test]
    fn window_rollover_resets_the_count() {
        let limiter = limiter(10, 60);
        let key = key();
        // Aligned window start so every call below lands in the same window.
        let start = Utc.timestamp_opt(1_700_000_040, 0).unwrap();

        for _ in 0..11 {
            limiter.admit_at(key.clone(), OperationClass::Issue, start);
        }
        assert!(matches!(
            limiter.admit_at(key.clone(), OperationClass::Issue, start),
            Admission::Limited { .. }
        ));

        // 61 seconds later a fresh window admits again.
        let later = start + chrono::Duration::seconds(61);
        assert_eq!(
            limiter.admit_at(key.clone(), OperationClass::Issue, later),
            Admission::Allowed
        );
    }

    #[test]
    fn retry_after_counts_down_to_the_window_end() {
        let limiter = limiter(1, 60);
        let key = key();
        let start = Utc.timestamp_opt(1_700_000_040, 0).unwrap();

        assert_eq!(
            limiter.admit_at(key.clone(), OperationClass::Rotate, start),
            Admission::Allowed
        );
        let at = start + chrono::Duration::seconds(20);
        match limiter.admit_at(key.clone(), OperationClass::Rotate, at) {
            Admission::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 40),
            Admission::Allowed => panic!("second call in the window must be limited"),
        }
    }

    #[test]
    fn classes_and_keys_are_independent() {
        let limiter = limiter(1, 60);
        let key_a = key();
        let key_b = key();
        let at = Utc.timestamp_opt(1_700_000_040, 0).unwrap();

        assert_eq!(
            limiter.admit_at(key_a.clone(), OperationClass::Issue, at),
            Admission::Allowed
        );
        // Same key, different class: unaffected.
        assert_eq!(
            limiter.admit_at(key_a.clone(), OperationClass::Rotate, at),
            Admission::Allowed
        );
        // Different key, same class: unaffected.
        assert_eq!(
            limiter.admit_at(key_b, OperationClass::Issue, at),
            Admission::Allowed
        );
        // Same key and class: limited.
        assert!(matches!(
            limiter.admit_at(key_a, OperationClass::Issue, at),
            Admission::Limited { .. }
        ));
    }
}
