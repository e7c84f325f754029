//! Existence filter, link cache and lock implementations shared across Tinylink.

pub mod bloom_filter;
pub mod moka;
pub mod redis;

pub use bloom_filter::{BloomFilter, BloomFilterConfig};
pub use moka::{MokaCacheConfig, MokaLinkCache};
pub use redis::RedisLinkCache;
