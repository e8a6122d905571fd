//! Periodic removal of expired records.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::RateLimitStore;
use crate::error::Result;

/// Deletes records whose window has ended, on a fixed interval.
pub struct Sweeper {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Run a single sweep.
    pub async fn sweep_once(&self) -> Result<u64> {
        let removed = self.store.sweep_expired(self.clock.now()).await?;
        debug!(removed = removed, "Swept expired rate limit records");
        Ok(removed)
    }

    /// Sweep every interval until `shutdown` changes or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Starting record sweeper");
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Record sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("Stopping record sweeper");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::MemoryStore;
    use crate::ratelimit::record::LimitPolicy;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_sweep_once_uses_clock() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let policy = LimitPolicy::new(5, ChronoDuration::seconds(60));

        store.hit("a", clock.now(), &policy).await.unwrap();
        let sweeper = Sweeper::new(store.clone(), Arc::new(clock.clone()), Duration::from_secs(1));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        clock.advance(ChronoDuration::seconds(60));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let policy = LimitPolicy::new(5, ChronoDuration::seconds(60));
        store.hit("a", clock.now(), &policy).await.unwrap();
        clock.advance(ChronoDuration::seconds(61));

        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(store.clone(), Arc::new(clock), Duration::from_secs(10)).spawn(rx);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
