//! Rate limit record and the fixed-window transition.

use chrono::{DateTime, Duration, Utc};

/// Limit applied to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Maximum requests admitted in one window
    pub max_requests: u64,
    /// Length of a window, measured from the request that opens it
    pub window: Duration,
}

impl LimitPolicy {
    /// Create a new policy.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// End of a window opened at `now`, clamped to the latest representable instant.
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Requests still allowed after `count` have been admitted.
    pub fn remaining(&self, count: u64) -> u64 {
        self.max_requests.saturating_sub(count)
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new(100, Duration::seconds(60))
    }
}

/// Counter state for a single client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Client identity
    pub key: String,
    /// Requests admitted in the current window
    pub count: u64,
    /// End of the current window
    pub reset_at: DateTime<Utc>,
}

impl RateLimitRecord {
    /// Open a fresh window at `now` with one request counted.
    pub fn open(key: &str, now: DateTime<Utc>, policy: &LimitPolicy) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            reset_at: policy.window_end(now),
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset_at <= now
    }
}

/// What a single hit did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// No record existed; one was created
    Created,
    /// The window had ended; it was reopened
    Reset,
    /// The count was incremented inside the open window
    Incremented,
    /// The window is full; nothing was written
    Rejected,
}

impl HitOutcome {
    /// Whether the request is admitted.
    pub fn admitted(&self) -> bool {
        !matches!(self, HitOutcome::Rejected)
    }

    /// Whether the store must persist the resulting record.
    pub fn writes(&self) -> bool {
        self.admitted()
    }

    /// Stable numeric code shared with the server-side script.
    pub fn code(&self) -> i64 {
        match self {
            HitOutcome::Created => 0,
            HitOutcome::Reset => 1,
            HitOutcome::Incremented => 2,
            HitOutcome::Rejected => 3,
        }
    }

    /// Inverse of [`HitOutcome::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HitOutcome::Created),
            1 => Some(HitOutcome::Reset),
            2 => Some(HitOutcome::Incremented),
            3 => Some(HitOutcome::Rejected),
            _ => None,
        }
    }
}

/// The record after a hit, together with what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub record: RateLimitRecord,
    pub outcome: HitOutcome,
}

impl Hit {
    pub fn admitted(&self) -> bool {
        self.outcome.admitted()
    }
}

/// Apply one request at `now` to the current record for `key`.
///
/// Callers must hold exclusive access to the key for the duration of the
/// read and the write of the returned record.
pub fn apply_hit(
    current: Option<&RateLimitRecord>,
    key: &str,
    now: DateTime<Utc>,
    policy: &LimitPolicy,
) -> Hit {
    match current {
        None => Hit {
            record: RateLimitRecord::open(key, now, policy),
            outcome: HitOutcome::Created,
        },
        Some(record) if record.is_expired(now) => Hit {
            record: RateLimitRecord::open(key, now, policy),
            outcome: HitOutcome::Reset,
        },
        Some(record) if record.count < policy.max_requests => Hit {
            record: RateLimitRecord {
                count: record.count + 1,
                ..record.clone()
            },
            outcome: HitOutcome::Incremented,
        },
        Some(record) => Hit {
            record: record.clone(),
            outcome: HitOutcome::Rejected,
        },
    }
}

/// Whole seconds until `reset_at`, rounded up. Zero once it has passed.
pub fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let left = reset_at - now;
    if left <= Duration::zero() {
        return 0;
    }
    match left.num_microseconds() {
        Some(micros) => (micros as u64).div_ceil(1_000_000),
        None => left.num_seconds() as u64,
    }
}
