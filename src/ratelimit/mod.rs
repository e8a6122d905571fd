//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod memory;
mod record;
mod redis_store;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{ClientKey, ANONYMOUS_KEY};
pub use limiter::{Decision, RateLimiter, Status};
pub use memory::MemoryStore;
pub use record::{apply_hit, retry_after_secs, Hit, HitOutcome, LimitPolicy, RateLimitRecord};
pub use redis_store::RedisStore;
pub use store::RateLimitStore;
pub use sweeper::Sweeper;
