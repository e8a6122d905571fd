//! Storage trait for rate limit records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::record::{Hit, LimitPolicy, RateLimitRecord};
use crate::error::StoreError;

/// Persistent home of the per-key counters.
///
/// The limiter holds no state of its own; every decision is one call into
/// the store. Implementations must apply [`RateLimitStore::hit`] atomically
/// per key, so that concurrent hits on one key never both observe the same
/// count.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` at `now` and return the resulting record.
    ///
    /// Follows [`apply_hit`](super::record::apply_hit): a rejected hit
    /// leaves the stored record untouched.
    async fn hit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        policy: &LimitPolicy,
    ) -> Result<Hit, StoreError>;

    /// Read the record for `key` without modifying it.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    /// Delete records whose window ended at or before `now`.
    ///
    /// Returns the number of records removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
