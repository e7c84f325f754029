use crate::error::CacheError;
use crate::shortcode::ShortCode;

/// A probabilistic membership test over allocated short codes.
///
/// `exists` returning `false` is authoritative: the code was never added.
/// `true` may be a false positive and must be confirmed against the durable
/// store. Codes cannot be removed; a rebuild is the only way to shed codes
/// that have expired or were deleted.
///
/// Implementations must be safe for concurrent `add` and `exists` calls.
pub trait ExistenceFilter: Send + Sync + 'static {
    /// Marks a code as allocated.
    fn add(&self, code: &ShortCode);

    /// Tests whether a code may have been allocated.
    fn exists(&self, code: &ShortCode) -> bool;

    /// Starts recording every code added from now on, so a rebuild from a
    /// snapshot taken after this call cannot lose concurrent additions.
    fn begin_rebuild(&self);

    /// Replaces the filter contents with `codes` plus everything added since
    /// [`ExistenceFilter::begin_rebuild`].
    fn finish_rebuild(&self, codes: &[ShortCode]) -> Result<(), CacheError>;

    /// Stops recording additions and keeps the current contents.
    fn abort_rebuild(&self);
}
