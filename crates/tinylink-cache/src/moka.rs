use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinylink_core::{CacheError, DistributedLock, LinkCache, LockHandle, ShortCode, ShortLinkRecord};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone)]
struct CachedLink {
    record: ShortLinkRecord,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedLink> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedLink,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedLink,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A pending view counter. `seq` orders counters for scanning and never
/// changes while the counter lives.
#[derive(Debug, Clone, Copy)]
struct ViewCounter {
    seq: u64,
    count: u64,
}

#[derive(Debug, Clone)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

/// An in-memory implementation of [`LinkCache`] and [`DistributedLock`].
///
/// Link records live in a Moka cache with per-entry expiry. View counters
/// and locks live in `DashMap`s. This is the single-node backend: the lock
/// only excludes tasks within the same process.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct MokaLinkCache {
    links: Cache<String, CachedLink>,
    views: Arc<DashMap<String, ViewCounter>>,
    next_seq: Arc<AtomicU64>,
    locks: Arc<DashMap<String, HeldLock>>,
}

impl MokaLinkCache {
    /// Creates a new Moka link cache with default settings.
    ///
    /// The cache will have a default maximum capacity of 10,000 entries.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a new Moka link cache with a custom maximum capacity.
    ///
    /// # Arguments
    ///
    /// * `max_capacity` - Maximum number of link records the cache can hold
    pub fn with_capacity(max_capacity: u64) -> Self {
        MokaCacheConfig::builder()
            .max_capacity(max_capacity)
            .build()
            .into()
    }

    /// Returns a builder for creating a custom cache configuration.
    pub fn builder() -> MokaCacheConfigBuilder {
        MokaCacheConfig::builder()
    }
}

impl Default for MokaLinkCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for creating a [`MokaLinkCache`] with custom settings.
#[derive(Debug, TypedBuilder)]
pub struct MokaCacheConfig {
    /// Maximum number of link records the cache can hold.
    #[builder(default = 10_000)]
    max_capacity: u64,
    /// Time-to-idle for link records, on top of their own expiry.
    #[builder(default, setter(strip_option))]
    tti: Option<Duration>,
}

impl From<MokaCacheConfig> for MokaLinkCache {
    fn from(config: MokaCacheConfig) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryTtl);

        if let Some(tti) = config.tti {
            builder = builder.time_to_idle(tti);
        }

        MokaLinkCache {
            links: builder.build(),
            views: Arc::new(DashMap::new()),
            // 0 is the scan start cursor, so sequence numbers begin at 1.
            next_seq: Arc::new(AtomicU64::new(1)),
            locks: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl LinkCache for MokaLinkCache {
    async fn get_link(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        trace!(code = %code, "Fetching link record from Moka cache");

        match self.links.get(code.as_str()).await {
            Some(cached) => {
                debug!(code = %code, "Cache hit in Moka");
                Ok(Some(cached.record))
            }
            None => {
                trace!(code = %code, "Cache miss in Moka");
                Ok(None)
            }
        }
    }

    async fn set_link(&self, record: &ShortLinkRecord, ttl: Duration) -> Result<()> {
        trace!(code = %record.code, "Storing link record in Moka cache");

        let cached = CachedLink {
            record: record.clone(),
            ttl,
        };
        self.links.insert(record.code.as_str().to_string(), cached).await;
        debug!(code = %record.code, "Cached record in Moka");
        Ok(())
    }

    async fn del_link(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing link record from Moka cache");

        self.links.invalidate(code.as_str()).await;
        debug!(code = %code, "Removed record from Moka cache (if present)");
        Ok(())
    }

    async fn incr_views(&self, code: &ShortCode) -> Result<u64> {
        let mut counter = self
            .views
            .entry(code.as_str().to_string())
            .or_insert_with(|| ViewCounter {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                count: 0,
            });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn get_views(&self, code: &ShortCode) -> Result<u64> {
        Ok(self.views.get(code.as_str()).map(|v| v.count).unwrap_or(0))
    }

    async fn del_views(&self, code: &ShortCode) -> Result<u64> {
        Ok(self
            .views
            .remove(code.as_str())
            .map(|(_, counter)| counter.count)
            .unwrap_or(0))
    }

    /// Scans counters in creation order. The cursor is the sequence number
    /// to resume from, so deleting counters between calls never shifts
    /// the ones not visited yet.
    async fn scan_views(&self, cursor: u64, count: usize) -> Result<(Vec<ShortCode>, u64)> {
        let mut pending = self
            .views
            .iter()
            .filter(|entry| entry.seq >= cursor)
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect::<Vec<_>>();
        pending.sort_unstable_by_key(|(seq, _)| *seq);

        let count = count.max(1);
        let next_cursor = match pending.get(count) {
            Some((seq, _)) => *seq,
            None => 0,
        };
        let batch = pending
            .into_iter()
            .take(count)
            .map(|(_, key)| ShortCode::new_unchecked(key))
            .collect::<Vec<_>>();

        Ok((batch, next_cursor))
    }
}

#[async_trait]
impl DistributedLock for MokaLinkCache {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let now = Instant::now();
        let token = Uuid::new_v4().to_string();
        let held = HeldLock {
            token: token.clone(),
            expires_at: now + ttl,
        };

        // The entry guard holds the shard lock, making check-and-set atomic.
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut current) => {
                if current.get().expires_at > now {
                    trace!(lock = key, "Lock is held by another owner");
                    return Ok(None);
                }
                current.insert(held);
            }
            Entry::Vacant(slot) => {
                slot.insert(held);
            }
        }

        debug!(lock = key, "Acquired lock");
        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
            ttl,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let released = self
            .locks
            .remove_if(&handle.key, |_, held| held.token == handle.token)
            .is_some();
        debug!(lock = %handle.key, released, "Released lock");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::{SignedDuration, Timestamp};

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn test_record(c: &str, url: &str) -> ShortLinkRecord {
        let now = Timestamp::now();
        ShortLinkRecord {
            code: code(c),
            original_url: url.to_string(),
            owner_id: 1,
            is_custom: false,
            expires_at: now + SignedDuration::from_hours(1),
            created_at: now,
            view_count: 0,
        }
    }

    #[tokio::test]
    async fn cache_get_and_set() {
        let cache = MokaLinkCache::new();
        let record = test_record("abc123", "https://example.com");

        assert!(cache.get_link(&record.code).await.unwrap().is_none());

        cache
            .set_link(&record, Duration::from_secs(60))
            .await
            .unwrap();

        let result = cache.get_link(&record.code).await.unwrap();
        assert_eq!(result, Some(record));
    }

    #[tokio::test]
    async fn cache_del_is_idempotent() {
        let cache = MokaLinkCache::new();
        let record = test_record("abc123", "https://example.com");
        cache
            .set_link(&record, Duration::from_secs(60))
            .await
            .unwrap();

        cache.del_link(&record.code).await.unwrap();
        assert!(cache.get_link(&record.code).await.unwrap().is_none());

        cache.del_link(&record.code).await.unwrap();
    }

    #[tokio::test]
    async fn entries_expire_after_their_own_ttl() {
        let cache = MokaLinkCache::new();
        let short = test_record("short1", "https://short.example");
        let long = test_record("long01", "https://long.example");

        cache
            .set_link(&short, Duration::from_millis(50))
            .await
            .unwrap();
        cache
            .set_link(&long, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get_link(&short.code).await.unwrap().is_none());
        assert!(cache.get_link(&long.code).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn builder_applies_time_to_idle() {
        let cache: MokaLinkCache = MokaLinkCache::builder()
            .max_capacity(100)
            .tti(Duration::from_millis(50))
            .build()
            .into();
        let record = test_record("idle01", "https://example.com");
        cache
            .set_link(&record, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get_link(&record.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn view_counters_increment_and_reset() {
        let cache = MokaLinkCache::new();
        let c = code("abc123");

        assert_eq!(cache.get_views(&c).await.unwrap(), 0);
        cache.incr_views(&c).await.unwrap();
        cache.incr_views(&c).await.unwrap();
        assert_eq!(cache.incr_views(&c).await.unwrap(), 3);

        assert_eq!(cache.del_views(&c).await.unwrap(), 3);
        assert_eq!(cache.get_views(&c).await.unwrap(), 0);
        assert_eq!(cache.del_views(&c).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let cache = MokaLinkCache::new();
        let mut handles = vec![];
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    cache.incr_views(&code("hot001")).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.get_views(&code("hot001")).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn scan_visits_every_counter_and_returns_to_zero() {
        let cache = MokaLinkCache::new();
        for i in 0..25 {
            cache.incr_views(&code(&format!("code{i:02}"))).await.unwrap();
        }

        let mut seen = vec![];
        let mut cursor = 0;
        let mut rounds = 0;
        loop {
            let (batch, next) = cache.scan_views(cursor, 10).await.unwrap();
            seen.extend(batch);
            rounds += 1;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(rounds, 3);
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn scan_survives_deleting_each_batch() {
        let cache = MokaLinkCache::new();
        for i in 0..250 {
            cache.incr_views(&code(&format!("code{i:03}"))).await.unwrap();
        }

        let mut taken = 0;
        let mut cursor = 0;
        loop {
            let (batch, next) = cache.scan_views(cursor, 100).await.unwrap();
            for c in &batch {
                taken += cache.del_views(c).await.unwrap();
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(taken, 250);
        let (left, _) = cache.scan_views(0, 1_000).await.unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn scan_of_empty_keyspace_finishes_immediately() {
        let cache = MokaLinkCache::new();
        let (batch, next) = cache.scan_views(0, 100).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let cache = MokaLinkCache::new();
        let ttl = Duration::from_secs(60);

        let handle = cache.acquire("cleanup", ttl).await.unwrap().unwrap();
        assert!(cache.acquire("cleanup", ttl).await.unwrap().is_none());
        assert!(cache.acquire("sync_views", ttl).await.unwrap().is_some());

        assert!(cache.release(&handle).await.unwrap());
        assert!(cache.acquire("cleanup", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_and_old_holder_cannot_release_it() {
        let cache = MokaLinkCache::new();

        let stale = cache
            .acquire("cleanup", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fresh = cache
            .acquire("cleanup", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("expired lock should be acquirable");
        assert_ne!(stale.token, fresh.token);

        assert!(!cache.release(&stale).await.unwrap());
        assert!(cache.acquire("cleanup", Duration::from_secs(60)).await.unwrap().is_none());
        assert!(cache.release(&fresh).await.unwrap());
    }
}
