//! Bloom filter existence check for fast negative lookups.
//!
//! A Bloom filter is a space-efficient probabilistic data structure that can
//! tell you with certainty if an item is NOT in a set, or that it MIGHT be
//! in the set (with a configurable false positive rate).
//!
//! The engine consults the filter before touching the cache or the durable
//! store, so lookups for codes that were never allocated cost no network
//! round-trip at all.
//!
//! Bloom filters do not support deletion. Codes of expired or deleted links
//! stay in the filter until the next rebuild, which
//! slowly raises the false positive rate in between.

use parking_lot::RwLock;
use tracing::debug;
use tinylink_core::{CacheError, ExistenceFilter, ShortCode};
use typed_builder::TypedBuilder;

/// Configuration for the Bloom filter.
///
/// The Bloom filter is a probabilistic data structure that trades a small
/// false positive rate for significant memory savings.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct BloomFilterConfig {
    /// Expected number of items to be inserted into the filter.
    ///
    /// This should be an estimate of how many unique short codes will be
    /// allocated. Setting this too low will increase the false positive rate.
    #[builder]
    pub expected_items: usize,

    /// Desired false positive rate as a probability between 0.0 and 1.0.
    ///
    /// For example, a value of 0.01 means approximately 1% false positive rate.
    /// Lower values use more memory but reduce false positives.
    #[builder]
    pub false_positive_rate: f64,
}

/// An in-process [`ExistenceFilter`] backed by a Bloom filter.
///
/// # Example
///
/// ```rust
/// use tinylink_cache::{BloomFilter, BloomFilterConfig};
/// use tinylink_core::{ExistenceFilter, ShortCode};
///
/// let config = BloomFilterConfig::builder()
///     .expected_items(1_000_000)
///     .false_positive_rate(0.01)
///     .build();
///
/// let filter = BloomFilter::new(config).unwrap();
/// let code = ShortCode::new_unchecked("abc123");
/// filter.add(&code);
/// assert!(filter.exists(&code));
/// ```
pub struct BloomFilter {
    config: BloomFilterConfig,
    state: RwLock<FilterState>,
}

struct FilterState {
    bloom: bloomfilter::Bloom<str>,
    /// Codes added while a rebuild is running.
    /// `Some` while rebuilding, `None` otherwise.
    rebuild_buffer: Option<Vec<ShortCode>>,
}

impl BloomFilter {
    /// Creates an empty Bloom filter sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Initialization` if the parameters cannot produce
    /// a filter.
    pub fn new(config: BloomFilterConfig) -> Result<Self, CacheError> {
        let bloom = Self::empty_bloom(&config)?;
        Ok(Self {
            config,
            state: RwLock::new(FilterState {
                bloom,
                rebuild_buffer: None,
            }),
        })
    }

    pub fn config(&self) -> &BloomFilterConfig {
        &self.config
    }

    fn empty_bloom(config: &BloomFilterConfig) -> Result<bloomfilter::Bloom<str>, CacheError> {
        bloomfilter::Bloom::new_for_fp_rate(config.expected_items, config.false_positive_rate)
            .map_err(|e| CacheError::Initialization(e.to_string()))
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExistenceFilter for BloomFilter {
    fn add(&self, code: &ShortCode) {
        let mut state = self.state.write();
        state.bloom.set(code.as_str());
        if let Some(pending) = state.rebuild_buffer.as_mut() {
            pending.push(code.clone());
        }
    }

    fn exists(&self, code: &ShortCode) -> bool {
        self.state.read().bloom.check(code.as_str())
    }

    fn begin_rebuild(&self) {
        self.state.write().rebuild_buffer = Some(Vec::new());
    }

    /// Builds a fresh filter outside the lock and swaps it in.
    ///
    /// Readers see either the old complete filter or the new complete one.
    /// Codes added since `begin_rebuild` are replayed before the swap.
    fn finish_rebuild(&self, codes: &[ShortCode]) -> Result<(), CacheError> {
        let mut fresh = match Self::empty_bloom(&self.config) {
            Ok(bloom) => bloom,
            Err(e) => {
                self.abort_rebuild();
                return Err(e);
            }
        };
        for code in codes {
            fresh.set(code.as_str());
        }

        let mut state = self.state.write();
        let pending = state.rebuild_buffer.take().unwrap_or_default();
        for code in &pending {
            fresh.set(code.as_str());
        }
        state.bloom = fresh;
        drop(state);

        debug!(
            codes = codes.len(),
            concurrent_adds = pending.len(),
            "rebuilt bloom filter"
        );
        Ok(())
    }

    fn abort_rebuild(&self) {
        self.state.write().rebuild_buffer = None;
    }
}
