//! Global storage quota admission control.
//!
//! Usage is a fresh aggregate on every check: the sum of all snapshot body
//! sizes plus all image blob sizes, compared against a configured ceiling.
//! The check is advisory-consistent, not linearizable — two concurrent
//! writers can both pass against a stale aggregate and jointly overshoot,
//! which is accepted at this subsystem's write concurrency. Quota is
//! consulted on write only, never on read.

use sqlx::PgPool;
use tracing::debug;

use markvault_core::{QuotaDecision, Result};

/// Computes aggregate usage and decides write admission.
#[derive(Clone)]
pub struct QuotaEnforcer {
    pool: PgPool,
    /// Configured byte ceiling; `None` means unlimited.
    limit_bytes: Option<i64>,
}

impl QuotaEnforcer {
    /// Create an enforcer with a normalized limit (`None`, zero, or
    /// negative raw configuration all mean unlimited).
    pub fn new(pool: PgPool, raw_limit: Option<i64>) -> Self {
        Self {
            pool,
            limit_bytes: raw_limit.filter(|v| *v > 0),
        }
    }

    /// The configured ceiling, if any.
    pub fn limit_bytes(&self) -> Option<i64> {
        self.limit_bytes
    }

    /// Current aggregate stored bytes across snapshots and image blobs.
    pub async fn used_bytes(&self) -> Result<i64> {
        let snapshot_bytes: Option<i64> =
            sqlx::query_scalar("SELECT SUM(storage_size)::BIGINT FROM snapshot")
                .fetch_one(&self.pool)
                .await?;
        let image_bytes: Option<i64> =
            sqlx::query_scalar("SELECT SUM(size_bytes)::BIGINT FROM image_blob")
                .fetch_one(&self.pool)
                .await?;
        Ok(snapshot_bytes.unwrap_or(0) + image_bytes.unwrap_or(0))
    }

    /// Decide whether a prospective write of `additional_bytes` is
    /// admissible. Usage is reported even when the quota is unlimited.
    pub async fn check(&self, additional_bytes: i64) -> Result<QuotaDecision> {
        let used_bytes = self.used_bytes().await?;
        let allowed = admit(used_bytes, additional_bytes, self.limit_bytes);

        debug!(
            subsystem = "db",
            component = "quota",
            op = "check",
            bytes = additional_bytes,
            quota_used = used_bytes,
            quota_limit = self.limit_bytes.unwrap_or(0),
            success = allowed,
            "Quota admission check"
        );

        Ok(QuotaDecision {
            allowed,
            used_bytes,
            limit_bytes: self.limit_bytes,
        })
    }
}

/// Pure admission rule: `used + additional <= limit`, unlimited when no
/// finite limit is configured.
pub fn admit(used_bytes: i64, additional_bytes: i64, limit_bytes: Option<i64>) -> bool {
    match limit_bytes {
        Some(limit) => used_bytes.saturating_add(additional_bytes) <= limit,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_within_limit() {
        assert!(admit(900, 50, Some(1000)));
        assert!(admit(900, 100, Some(1000))); // exactly at the ceiling
    }

    #[test]
    fn test_admit_rejects_over_limit() {
        assert!(!admit(900, 200, Some(1000)));
        assert!(!admit(1000, 1, Some(1000)));
    }

    #[test]
    fn test_admit_unlimited_always_allows() {
        assert!(admit(i64::MAX - 1, 1, None));
        assert!(admit(0, i64::MAX, None));
    }

    #[test]
    fn test_admit_zero_additional_at_full_usage() {
        assert!(admit(1000, 0, Some(1000)));
    }

    #[test]
    fn test_admit_saturates_instead_of_overflowing() {
        assert!(!admit(i64::MAX, 1, Some(i64::MAX - 1)));
    }
}
