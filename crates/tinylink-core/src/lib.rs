//! Core types and traits for the tinylink URL shortener.
//!
//! This crate holds the data model shared by every other crate in the
//! workspace, together with the narrow collaborator traits the engine
//! consumes: the durable [`LinkStore`], the [`LinkCache`] with its view
//! counters, the [`DistributedLock`] and the [`ExistenceFilter`].

pub mod cache;
pub mod error;
pub mod filter;
pub mod lock;
pub mod record;
pub mod shortcode;
pub mod store;

pub use cache::LinkCache;
pub use error::{CacheError, CoreError, StorageError};
pub use filter::ExistenceFilter;
pub use lock::{DistributedLock, LockHandle};
pub use record::ShortLinkRecord;
pub use shortcode::ShortCode;
pub use store::{LinkStore, Page};
