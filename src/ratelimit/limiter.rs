//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::ClientKey;
use super::record::{retry_after_secs, LimitPolicy};
use super::store::RateLimitStore;
use crate::config::FailureMode;
use crate::error::Result;

/// The admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Configured requests per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// End of the current window
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying, set only on rejection
    pub retry_after_secs: Option<u64>,
    /// The store failed and the request was admitted without counting
    pub degraded: bool,
}

/// Read-only view of a key's allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window limiter over a [`RateLimitStore`].
///
/// The limiter keeps no counters itself, so any number of instances can
/// share one store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policy: LimitPolicy,
    failure_mode: FailureMode,
}

impl RateLimiter {
    /// Create a limiter that reads the system clock and fails open.
    pub fn new(store: Arc<dyn RateLimitStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy,
            failure_mode: FailureMode::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Count a request for `key` and decide whether it is admitted.
    pub async fn check(&self, key: &ClientKey) -> Result<Decision> {
        self.check_at(key, self.clock.now()).await
    }

    /// Count a request for `key` at `now`.
    ///
    /// A store failure is converted into an uncounted admission when the
    /// limiter fails open, and returned as an error when it fails closed.
    pub async fn check_at(&self, key: &ClientKey, now: DateTime<Utc>) -> Result<Decision> {
        trace!(key = %key, "Checking rate limit");

        let hit = match self.store.hit(key.as_str(), now, &self.policy).await {
            Ok(hit) => hit,
            Err(e) => match self.failure_mode {
                FailureMode::Open => {
                    warn!(key = %key, error = %e, "Rate limit store failed, admitting request");
                    return Ok(Decision {
                        admitted: true,
                        limit: self.policy.max_requests,
                        remaining: self.policy.max_requests,
                        reset_at: self.policy.window_end(now),
                        retry_after_secs: None,
                        degraded: true,
                    });
                }
                FailureMode::Closed => {
                    error!(key = %key, error = %e, "Rate limit store failed, rejecting request");
                    return Err(e.into());
                }
            },
        };

        let admitted = hit.admitted();
        let retry_after = if admitted {
            None
        } else {
            let secs = retry_after_secs(hit.record.reset_at, now);
            debug!(
                key = %key,
                count = hit.record.count,
                limit = self.policy.max_requests,
                retry_after = secs,
                "Rate limit exceeded"
            );
            Some(secs)
        };

        Ok(Decision {
            admitted,
            limit: self.policy.max_requests,
            remaining: self.policy.remaining(hit.record.count),
            reset_at: hit.record.reset_at,
            retry_after_secs: retry_after,
            degraded: false,
        })
    }

    /// Current allowance for `key`, without counting a request.
    pub async fn status(&self, key: &ClientKey) -> Result<Status> {
        self.status_at(key, self.clock.now()).await
    }

    /// Allowance for `key` as of `now`. Never writes to the store.
    ///
    /// A missing or expired record reports the full allowance and the window
    /// the next request would open.
    pub async fn status_at(&self, key: &ClientKey, now: DateTime<Utc>) -> Result<Status> {
        let record = self.store.get(key.as_str()).await?;

        let status = match record {
            Some(record) if !record.is_expired(now) => Status {
                limit: self.policy.max_requests,
                remaining: self.policy.remaining(record.count),
                reset_at: record.reset_at,
            },
            _ => Status {
                limit: self.policy.max_requests,
                remaining: self.policy.max_requests,
                reset_at: self.policy.window_end(now),
            },
        };

        Ok(status)
    }
}
