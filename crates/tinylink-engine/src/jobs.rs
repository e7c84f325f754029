//! Periodic reconciliation jobs.
//!
//! Every node runs the same schedule. Cluster-wide jobs take a
//! [`DistributedLock`] first so only one node does the work per tick; the
//! lock TTL equals the job timeout, so a crashed holder blocks others for at
//! most one timeout.

use crate::engine::{LinkEngine, SyncReport};
use crate::error::EngineError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tinylink_core::{CacheError, DistributedLock, ExistenceFilter, LinkCache, LinkStore};
use tinylink_generator::Generator;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lock guarding the expired-link cleanup.
pub const CLEANUP_LOCK: &str = "cleanup";
/// Lock guarding the view counter merge.
pub const SYNC_VIEWS_LOCK: &str = "sync_views";

/// Upper bound on one job run, also used as the lock TTL.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How a job tick ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// Another node holds the lock for this tick.
    Skipped,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to acquire lock '{lock}': {source}")]
    Lock {
        lock: String,
        #[source]
        source: CacheError,
    },
    #[error("job '{job}' timed out after {timeout:?}")]
    TimedOut { job: String, timeout: Duration },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Runs jobs under a named lock with a timeout.
pub struct JobRunner<L> {
    lock: Arc<L>,
    timeout: Duration,
}

impl<L> Clone for JobRunner<L> {
    fn clone(&self) -> Self {
        Self {
            lock: Arc::clone(&self.lock),
            timeout: self.timeout,
        }
    }
}

impl<L: DistributedLock> JobRunner<L> {
    pub fn new(lock: L, timeout: Duration) -> Self {
        Self {
            lock: Arc::new(lock),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `job` if the lock named `name` can be taken.
    ///
    /// The lock is released whether the job succeeds, fails or times out.
    pub async fn run<T, Fut>(&self, name: &str, job: Fut) -> Result<JobOutcome<T>, JobError>
    where
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let handle = self
            .lock
            .acquire(name, self.timeout)
            .await
            .map_err(|source| JobError::Lock {
                lock: name.to_string(),
                source,
            })?;

        let Some(handle) = handle else {
            debug!(job = name, "Lock held elsewhere, skipping run");
            return Ok(JobOutcome::Skipped);
        };

        let result = tokio::time::timeout(self.timeout, job).await;

        match self.lock.release(&handle).await {
            Ok(true) => {}
            Ok(false) => warn!(job = name, "Lock expired before release"),
            Err(e) => warn!(job = name, error = %e, "Failed to release lock"),
        }

        match result {
            Ok(Ok(value)) => Ok(JobOutcome::Completed(value)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(JobError::TimedOut {
                job: name.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Calls `tick` every `period`, starting one period from now.
///
/// Ticks missed while a run is still going are dropped, not queued.
pub async fn run_every<F, Fut>(period: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        tick().await;
    }
}

/// The background jobs that keep cache, filter and store consistent.
pub struct Reconciler<S, C, F, G, L> {
    engine: LinkEngine<S, C, F, G>,
    runner: JobRunner<L>,
}

impl<S, C, F, G, L> Clone for Reconciler<S, C, F, G, L> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            runner: self.runner.clone(),
        }
    }
}

impl<S, C, F, G, L> Reconciler<S, C, F, G, L>
where
    S: LinkStore,
    C: LinkCache,
    F: ExistenceFilter,
    G: Generator,
    L: DistributedLock,
{
    pub fn new(engine: LinkEngine<S, C, F, G>, runner: JobRunner<L>) -> Self {
        Self { engine, runner }
    }

    /// One cleanup tick: deletes expired links under the `cleanup` lock.
    pub async fn cleanup_once(&self) -> Result<JobOutcome<u64>, JobError> {
        self.runner
            .run(CLEANUP_LOCK, self.engine.delete_all_expired())
            .await
    }

    /// One view-sync tick: merges view counters under the `sync_views` lock.
    pub async fn sync_views_once(&self) -> Result<JobOutcome<SyncReport>, JobError> {
        self.runner
            .run(SYNC_VIEWS_LOCK, self.engine.sync_views())
            .await
    }

    pub async fn cleanup_loop(&self, period: Duration) {
        run_every(period, move || async move {
            match self.cleanup_once().await {
                Ok(JobOutcome::Completed(removed)) => {
                    debug!(removed, "Cleanup run finished");
                }
                Ok(JobOutcome::Skipped) => {}
                Err(e) => error!(error = %e, "Cleanup run failed"),
            }
        })
        .await
    }

    pub async fn sync_views_loop(&self, period: Duration) {
        run_every(period, move || async move {
            match self.sync_views_once().await {
                Ok(JobOutcome::Completed(report)) => {
                    debug!(merged = report.merged, views = report.views, "View sync finished");
                }
                Ok(JobOutcome::Skipped) => {}
                Err(e) => error!(error = %e, "View sync failed"),
            }
        })
        .await
    }

    /// Rebuilds this node's filter every `period`.
    ///
    /// Each node owns its filter, so no lock is taken.
    pub async fn filter_rebuild_loop(&self, period: Duration) {
        run_every(period, move || async move {
            match self.engine.rebuild_filter().await {
                Ok(codes) => info!(codes, "Filter rebuild finished"),
                Err(e) => error!(error = %e, "Filter rebuild failed"),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use jiff::{SignedDuration, Timestamp};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tinylink_cache::{BloomFilter, BloomFilterConfig, MokaLinkCache};
    use tinylink_core::{ShortCode, ShortLinkRecord};
    use tinylink_generator::RandomGenerator;
    use tinylink_storage::InMemoryLinkStore;

    fn runner(lock: &MokaLinkCache, timeout: Duration) -> JobRunner<MokaLinkCache> {
        JobRunner::new(lock.clone(), timeout)
    }

    #[tokio::test]
    async fn completed_run_releases_the_lock() {
        let lock = MokaLinkCache::new();
        let runner = runner(&lock, Duration::from_secs(5));

        let outcome = runner.run("cleanup", async { Ok(42) }).await.unwrap();

        assert_eq!(outcome, JobOutcome::Completed(42));
        assert!(lock.acquire("cleanup", Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn held_lock_skips_the_run() {
        let lock = MokaLinkCache::new();
        let runner = runner(&lock, Duration::from_secs(5));
        let _other_node = lock
            .acquire("cleanup", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let ran = AtomicBool::new(false);

        let outcome = runner
            .run("cleanup", async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Skipped);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_run_releases_the_lock() {
        let lock = MokaLinkCache::new();
        let runner = runner(&lock, Duration::from_secs(5));

        let err = runner
            .run::<(), _>("sync_views", async {
                Err(EngineError::NotFound("abc".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Engine(EngineError::NotFound(_))));
        assert!(lock.acquire("sync_views", Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn slow_run_times_out_and_releases_the_lock() {
        let lock = MokaLinkCache::new();
        let runner = runner(&lock, Duration::from_millis(50));

        let err = runner
            .run("cleanup", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::TimedOut { .. }));
        assert!(lock.acquire("cleanup", Duration::from_secs(5)).await.unwrap().is_some());
    }

    fn reconciler(
        store: InMemoryLinkStore,
        cache: &MokaLinkCache,
    ) -> Reconciler<InMemoryLinkStore, MokaLinkCache, BloomFilter, RandomGenerator, MokaLinkCache>
    {
        let filter = BloomFilter::new(
            BloomFilterConfig::builder()
                .expected_items(1_000)
                .false_positive_rate(0.001)
                .build(),
        )
        .unwrap();
        let engine = LinkEngine::new(
            store,
            cache.clone(),
            filter,
            RandomGenerator::default(),
            EngineConfig::builder().base_url("https://tiny.link").build(),
        );
        Reconciler::new(engine, JobRunner::new(cache.clone(), DEFAULT_JOB_TIMEOUT))
    }

    fn record(code: &str, expires_in: SignedDuration) -> ShortLinkRecord {
        let now = Timestamp::now();
        ShortLinkRecord {
            code: ShortCode::new_unchecked(code),
            original_url: "https://example.com".to_string(),
            owner_id: 1,
            is_custom: false,
            expires_at: now + expires_in,
            created_at: now,
            view_count: 0,
        }
    }

    #[tokio::test]
    async fn cleanup_tick_deletes_expired_links() {
        let store = InMemoryLinkStore::new();
        store.create(&record("old001", -SignedDuration::from_hours(1))).await.unwrap();
        store.create(&record("new001", SignedDuration::from_hours(1))).await.unwrap();
        let cache = MokaLinkCache::new();
        let reconciler = reconciler(store, &cache);

        assert_eq!(
            reconciler.cleanup_once().await.unwrap(),
            JobOutcome::Completed(1)
        );
    }

    #[tokio::test]
    async fn cleanup_tick_is_skipped_while_another_node_holds_the_lock() {
        let store = InMemoryLinkStore::new();
        store.create(&record("old001", -SignedDuration::from_hours(1))).await.unwrap();
        let cache = MokaLinkCache::new();
        let reconciler = reconciler(store, &cache);
        let held = cache
            .acquire(CLEANUP_LOCK, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler.cleanup_once().await.unwrap(), JobOutcome::Skipped);

        cache.release(&held).await.unwrap();
        assert_eq!(
            reconciler.cleanup_once().await.unwrap(),
            JobOutcome::Completed(1)
        );
    }

    #[tokio::test]
    async fn sync_views_tick_merges_counters() {
        let store = InMemoryLinkStore::new();
        store.create(&record("abc123", SignedDuration::from_hours(1))).await.unwrap();
        let cache = MokaLinkCache::new();
        let reconciler = reconciler(store, &cache);
        let code = ShortCode::new_unchecked("abc123");
        cache.incr_views(&code).await.unwrap();
        cache.incr_views(&code).await.unwrap();

        let JobOutcome::Completed(report) = reconciler.sync_views_once().await.unwrap() else {
            panic!("view sync should have run");
        };

        assert_eq!(report.views, 2);
        assert_eq!(cache.get_views(&code).await.unwrap(), 0);
    }
    #[tokio::test]
    async fn sync_views_tick_is_skipped_while_another_node_holds_the_lock() {
        let store = InMemoryLinkStore::new();
        store.create(&record("abc123", SignedDuration::from_hours(1))).await.unwrap();
        let cache = MokaLinkCache::new();
        let reconciler = reconciler(store, &cache);
        let code = ShortCode::new_unchecked("abc123");
        cache.incr_views(&code).await.unwrap();
        let held = cache
            .acquire(SYNC_VIEWS_LOCK, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler.sync_views_once().await.unwrap(), JobOutcome::Skipped);
        assert_eq!(cache.get_views(&code).await.unwrap(), 1);

        cache.release(&held).await.unwrap();
        let JobOutcome::Completed(report) = reconciler.sync_views_once().await.unwrap() else {
            panic!("view sync should have run");
        };
        assert_eq!(report.merged, 1);
        assert_eq!(cache.get_views(&code).await.unwrap(), 0);
    }
}
