//! Durable link stores.

pub mod memory;
pub mod mysql;

pub use memory::InMemoryLinkStore;
pub use mysql::MySqlLinkStore;
pub use tinylink_core::store::{LinkStore, Page, Result};
pub use tinylink_core::StorageError;
