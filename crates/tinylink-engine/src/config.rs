use jiff::SignedDuration;
use typed_builder::TypedBuilder;

/// Lifetime of a link created without an explicit duration: 30 days.
pub const DEFAULT_LINK_DURATION: SignedDuration = SignedDuration::from_hours(24 * 30);

/// Candidate codes tried before allocation gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// `COUNT` hint for each view counter scan step.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// Settings for [`LinkEngine`](crate::LinkEngine).
///
/// ```rust
/// use tinylink_engine::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .base_url("https://tiny.link")
///     .build();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Prefix of every short URL handed back to callers.
    #[builder(setter(into))]
    pub base_url: String,
    #[builder(default = DEFAULT_LINK_DURATION)]
    pub default_duration: SignedDuration,
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[builder(default = DEFAULT_SCAN_BATCH_SIZE)]
    pub scan_batch_size: usize,
}
