mod cli;

use crate::cli::{CacheBackendArg, LogFormatArg, StorageBackendArg, CLI};
use anyhow::{ensure, Context};
use clap::Parser;
use jiff::SignedDuration;
use tinylink_cache::{BloomFilter, BloomFilterConfig, MokaLinkCache, RedisLinkCache};
use tinylink_core::{DistributedLock, LinkCache, LinkStore};
use tinylink_engine::{EngineConfig, JobRunner, LinkEngine, Reconciler};
use tinylink_generator::RandomGenerator;
use tinylink_storage::{InMemoryLinkStore, MySqlLinkStore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        base_url = %config.base_url,
        storage_backend = %config.storage,
        cache_backend = %config.cache,
        "starting tinylink server"
    );

    match config.storage {
        StorageBackendArg::InMemory => with_store(config, InMemoryLinkStore::new()).await,
        StorageBackendArg::Mysql => {
            let mysql_dsn = config
                .mysql_dsn
                .as_deref()
                .context("mysql dsn is required when storage backend is mysql")?;
            let store = MySqlLinkStore::connect(mysql_dsn, config.mysql_max_connections)
                .await
                .context("failed to connect to MySQL")?;
            store
                .ensure_schema()
                .await
                .context("failed to create MySQL schema")?;
            with_store(config, store).await
        }
    }
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormatArg::Text => subscriber.init(),
        LogFormatArg::Json => subscriber.json().init(),
    }
}

async fn with_store<S: LinkStore>(config: CLI, store: S) -> anyhow::Result<()> {
    match config.cache {
        CacheBackendArg::InMemory => {
            let cache = MokaLinkCache::with_capacity(config.cache_capacity);
            run(config, store, cache).await
        }
        CacheBackendArg::Redis => {
            let redis_url = config
                .redis_url
                .as_deref()
                .context("redis url is required when cache backend is redis")?;
            let cache = RedisLinkCache::connect(redis_url, config.redis_key_prefix.clone())
                .await
                .context("failed to connect to Redis")?;
            run(config, store, cache).await
        }
    }
}

/// Wires the engine and runs the background jobs until Ctrl-C.
///
/// The cache backend also provides the job lock.
async fn run<S, C>(config: CLI, store: S, cache: C) -> anyhow::Result<()>
where
    S: LinkStore,
    C: LinkCache + DistributedLock + Clone,
{
    ensure!(
        config.filter_error_rate > 0.0 && config.filter_error_rate < 1.0,
        "filter error rate must be between 0 and 1, got {}",
        config.filter_error_rate
    );
    let filter = BloomFilter::new(
        BloomFilterConfig::builder()
            .expected_items(config.filter_capacity)
            .false_positive_rate(config.filter_error_rate)
            .build(),
    )
    .context("failed to build existence filter")?;

    let engine_config = EngineConfig::builder()
        .base_url(config.base_url.clone())
        .default_duration(SignedDuration::from_hours(config.default_duration_hours))
        .build();
    let engine = LinkEngine::new(
        store,
        cache.clone(),
        filter,
        RandomGenerator::new(usize::from(config.code_length)),
        engine_config,
    );

    engine
        .prime_filter()
        .await
        .context("failed to prime existence filter")?;
    if let Err(e) = engine.delete_all_expired().await {
        warn!(error = %e, "startup cleanup failed");
    }

    let reconciler = Reconciler::new(engine, JobRunner::new(cache, config.job_timeout()));
    let mut jobs = JoinSet::new();

    let cleanup = reconciler.clone();
    let cleanup_interval = config.cleanup_interval();
    jobs.spawn(async move { cleanup.cleanup_loop(cleanup_interval).await });

    let view_sync = reconciler.clone();
    let sync_views_interval = config.sync_views_interval();
    jobs.spawn(async move { view_sync.sync_views_loop(sync_views_interval).await });

    let filter_rebuild = reconciler;
    let filter_rebuild_interval = config.filter_rebuild_interval();
    jobs.spawn(async move {
        filter_rebuild
            .filter_rebuild_loop(filter_rebuild_interval)
            .await
    });

    info!(
        cleanup_interval = ?cleanup_interval,
        sync_views_interval = ?sync_views_interval,
        filter_rebuild_interval = ?filter_rebuild_interval,
        "background jobs started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    jobs.abort_all();
    while jobs.join_next().await.is_some() {}
    Ok(())
}
