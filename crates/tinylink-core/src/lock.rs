use crate::error::CacheError;
use async_trait::async_trait;
use std::time::Duration;

/// Type alias for lock results.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Proof of ownership of a distributed lock.
///
/// The handle exists only for the duration of one job run. The lock
/// expires on its own after `ttl` if it is never released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    /// Opaque value unique to this acquisition.
    pub token: String,
    pub ttl: Duration,
}

/// A cluster-wide mutual exclusion primitive with expiring ownership.
#[async_trait]
pub trait DistributedLock: Send + Sync + 'static {
    /// Tries to take the lock named `key`, as an atomic "set if absent".
    ///
    /// Returns `Ok(None)` when someone else holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>>;

    /// Releases the lock only if `handle` still owns it.
    ///
    /// The ownership check and the delete are a single atomic step, so a lock
    /// that expired and was taken by another holder is never released here.
    /// Returns `true` if the lock was released.
    async fn release(&self, handle: &LockHandle) -> Result<bool>;
}
