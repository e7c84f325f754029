use crate::error::CacheError;
use crate::record::ShortLinkRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::time::Duration;

/// Type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A fast cache for link records plus the per-code view counters.
///
/// Records are keyed by [`ShortCode`]. View counters live in their own
/// keyspace so they can be scanned by the view-sync job independently of
/// the record entries.
#[async_trait]
pub trait LinkCache: Send + Sync + 'static {
    /// Get a link record from the cache.
    ///
    /// Returns `Ok(None)` if the key is not in the cache.
    async fn get_link(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>>;

    /// Store a link record that expires from the cache after `ttl`.
    async fn set_link(&self, record: &ShortLinkRecord, ttl: Duration) -> Result<()>;

    /// Remove a link record from the cache.
    ///
    /// It is not an error if the key does not exist.
    async fn del_link(&self, code: &ShortCode) -> Result<()>;

    /// Atomically increments the view counter of a code and returns the new value.
    async fn incr_views(&self, code: &ShortCode) -> Result<u64>;

    /// Returns the pending view count of a code, `0` when no counter exists.
    async fn get_views(&self, code: &ShortCode) -> Result<u64>;

    /// Removes the view counter of a code and returns the value it held at
    /// the moment of deletion (`0` when there was none).
    async fn del_views(&self, code: &ShortCode) -> Result<u64>;

    /// Iterates the view-counter keyspace.
    ///
    /// Start with cursor `0`; the scan is complete once the returned cursor
    /// is `0` again. `count` is a hint for the batch size. A code may be
    /// returned more than once during a full iteration.
    async fn scan_views(&self, cursor: u64, count: usize) -> Result<(Vec<ShortCode>, u64)>;
}
