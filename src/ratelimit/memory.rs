//! In-process record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::record::{apply_hit, Hit, HitOutcome, LimitPolicy, RateLimitRecord};
use super::store::RateLimitStore;
use crate::error::StoreError;

/// Records kept in a sharded map.
///
/// A hit holds the shard write lock for its key across the read and the
/// write, which makes it atomic per key. State is lost on restart and is
/// not shared between processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, RateLimitRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        policy: &LimitPolicy,
    ) -> Result<Hit, StoreError> {
        let entry = self.records.entry(key.to_string());
        let current = match &entry {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(_) => None,
        };

        let hit = apply_hit(current.as_ref(), key, now, policy);
        if hit.outcome == HitOutcome::Created {
            debug!(key = %key, reset_at = %hit.record.reset_at, "Creating rate limit record");
        }
        if hit.outcome.writes() {
            entry.insert(hit.record.clone());
        }

        Ok(hit)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_hit_creates_and_increments() {
        let store = MemoryStore::new();
        let policy = LimitPolicy::new(2, Duration::seconds(60));

        let hit = store.hit("a", at(0), &policy).await.unwrap();
        assert_eq!(hit.outcome, HitOutcome::Created);
        let hit = store.hit("a", at(1), &policy).await.unwrap();
        assert_eq!(hit.outcome, HitOutcome::Incremented);
        assert_eq!(hit.record.count, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_hit_does_not_write() {
        let store = MemoryStore::new();
        let policy = LimitPolicy::new(1, Duration::seconds(60));

        store.hit("a", at(0), &policy).await.unwrap();
        let hit = store.hit("a", at(5), &policy).await.unwrap();
        assert_eq!(hit.outcome, HitOutcome::Rejected);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.count, 1);
        assert_eq!(stored.reset_at, at(60));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        let policy = LimitPolicy::new(10, Duration::seconds(60));

        store.hit("old", at(0), &policy).await.unwrap();
        store.hit("new", at(30), &policy).await.unwrap();

        let removed = store.sweep_expired(at(60)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_hits_are_atomic() {
        let policy = LimitPolicy::new(50, Duration::seconds(60));

        for round in 0..20 {
            let store = Arc::new(MemoryStore::new());
            let barrier = Arc::new(tokio::sync::Barrier::new(80));

            let tasks: Vec<_> = (0..80)
                .map(|_| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        store.hit("shared", at(0), &policy).await.unwrap()
                    })
                })
                .collect();

            let admitted = futures::future::join_all(tasks)
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .filter(|hit| hit.admitted())
                .count();

            assert_eq!(admitted, 50, "round {}", round);
            assert_eq!(store.get("shared").await.unwrap().unwrap().count, 50);
        }
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.hit("a", at(0), &LimitPolicy::default()).await.unwrap();
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
    }
}
