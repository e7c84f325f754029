use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tinylink_core::{CacheError, DistributedLock, LinkCache, LockHandle, ShortCode, ShortLinkRecord};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;

const DEFAULT_PREFIX: &str = "tl:";

/// Deletes the lock only if it still holds the caller's token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A Redis-based implementation of [`LinkCache`] and [`DistributedLock`].
///
/// Keys, relative to the configurable prefix:
/// - `link:{code}`: the record as a JSON string, expiring with the record
/// - `views:{code}`: the pending view counter
/// - `lock:{name}`: the token of the current lock holder
#[derive(Debug, Clone)]
pub struct RedisLinkCache {
    conn: redis::aio::MultiplexedConnection,
    key_prefix: String,
    release_script: redis::Script,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() || message.to_ascii_lowercase().contains("timed out") {
        CacheError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0, and a sub-millisecond TTL should still expire promptly
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisLinkCache {
    /// Creates a new Redis link cache using the default `tl:` key prefix.
    ///
    /// # Arguments
    ///
    /// * `conn` - A multiplexed Redis connection
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self::with_prefix(conn, DEFAULT_PREFIX)
    }

    /// Creates a new Redis link cache with a custom key prefix.
    ///
    /// # Arguments
    ///
    /// * `conn` - A multiplexed Redis connection
    /// * `key_prefix` - Custom prefix for every key (e.g., "myapp:")
    pub fn with_prefix(
        conn: redis::aio::MultiplexedConnection,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            release_script: redis::Script::new(RELEASE_LOCK_SCRIPT),
        }
    }

    /// Opens a client for `url` and connects.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| map_redis_error("invalid Redis connection string", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to Redis: {e}")))?;
        Ok(Self::with_prefix(conn, key_prefix))
    }

    fn link_key(&self, code: &ShortCode) -> String {
        format!("{}link:{}", self.key_prefix, code.as_str())
    }

    fn views_prefix(&self) -> String {
        format!("{}views:", self.key_prefix)
    }

    fn views_key(&self, code: &ShortCode) -> String {
        format!("{}{}", self.views_prefix(), code.as_str())
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}lock:{}", self.key_prefix, name)
    }
}

#[async_trait]
impl LinkCache for RedisLinkCache {
    async fn get_link(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        let key = self.link_key(code);
        trace!(code = %code, "Fetching link record from Redis cache");

        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(cached)) => {
                debug!(code = %code, "Cache hit in Redis");
                match serde_json::from_str::<ShortLinkRecord>(&cached) {
                    Ok(record) => Ok(Some(record)),
                    Err(e) => {
                        warn!(code = %code, error = %e, "Failed to deserialize cached record");
                        Err(CacheError::InvalidData(format!(
                            "invalid cached value for key '{key}': {e}"
                        )))
                    }
                }
            }
            Ok(None) => {
                trace!(code = %code, "Cache miss in Redis");
                Ok(None)
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Redis error on get");
                Err(map_redis_error("failed to fetch value from Redis", e))
            }
        }
    }

    async fn set_link(&self, record: &ShortLinkRecord, ttl: Duration) -> Result<()> {
        let code = &record.code;
        let key = self.link_key(code);
        trace!(code = %code, ttl_ms = ttl_millis(ttl), "Storing link record in Redis cache");

        let json = serde_json::to_string(record).map_err(|e| {
            warn!(code = %code, error = %e, "Failed to serialize record for caching");
            CacheError::Serialization(format!("failed to serialize cache value: {e}"))
        })?;

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&key)
            .arg(json)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                warn!(code = %code, error = %e, "Failed to cache record in Redis");
                map_redis_error("failed to write value to Redis", e)
            })?;

        debug!(code = %code, "Cached record in Redis");
        Ok(())
    }

    async fn del_link(&self, code: &ShortCode) -> Result<()> {
        let key = self.link_key(code);
        trace!(code = %code, "Removing link record from Redis cache");

        let mut conn = self.conn.clone();
        match conn.del::<_, ()>(&key).await {
            Ok(()) => {
                debug!(code = %code, "Removed record from Redis cache");
                Ok(())
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to remove record from Redis cache");
                Err(map_redis_error("failed to delete value from Redis", e))
            }
        }
    }

    async fn incr_views(&self, code: &ShortCode) -> Result<u64> {
        let key = self.views_key(code);
        let mut conn = self.conn.clone();
        conn.incr::<_, _, u64>(&key, 1_u64)
            .await
            .map_err(|e| map_redis_error("failed to increment view counter", e))
    }

    async fn get_views(&self, code: &ShortCode) -> Result<u64> {
        let key = self.views_key(code);
        let mut conn = self.conn.clone();
        let views = conn
            .get::<_, Option<u64>>(&key)
            .await
            .map_err(|e| map_redis_error("failed to read view counter", e))?;
        Ok(views.unwrap_or(0))
    }

    async fn del_views(&self, code: &ShortCode) -> Result<u64> {
        let key = self.views_key(code);
        let mut conn = self.conn.clone();
        // GETDEL keeps increments that land between a read and a delete
        let views = redis::cmd("GETDEL")
            .arg(&key)
            .query_async::<Option<u64>>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to delete view counter", e))?;
        Ok(views.unwrap_or(0))
    }

    async fn scan_views(&self, cursor: u64, count: usize) -> Result<(Vec<ShortCode>, u64)> {
        let prefix = self.views_prefix();
        let mut conn = self.conn.clone();
        let (next_cursor, keys) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(format!("{prefix}*"))
            .arg("COUNT")
            .arg(count)
            .query_async::<(u64, Vec<String>)>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to scan view counters", e))?;

        let codes = keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .map(ShortCode::new_unchecked)
            .collect::<Vec<_>>();
        trace!(cursor, next_cursor, found = codes.len(), "Scanned view counters");
        Ok((codes, next_cursor))
    }
}

#[async_trait]
impl DistributedLock for RedisLinkCache {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let lock_key = self.lock_key(key);
        let token = Uuid::new_v4().to_string();

        let mut conn = self.conn.clone();
        let reply = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to acquire lock", e))?;

        if reply.is_none() {
            trace!(lock = key, "Lock is held by another owner");
            return Ok(None);
        }

        debug!(lock = key, "Acquired lock");
        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
            ttl,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool> {
        let lock_key = self.lock_key(&handle.key);
        let mut conn = self.conn.clone();
        let deleted = self
            .release_script
            .key(&lock_key)
            .arg(&handle.token)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to release lock", e))?;

        debug!(lock = %handle.key, released = deleted == 1, "Released lock");
        Ok(deleted == 1)
    }
}
