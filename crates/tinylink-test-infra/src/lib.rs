//! Disposable MySQL and Redis containers for integration tests.

pub mod error;
pub mod mysql;
pub mod redis;

pub use error::{Result, TestInfraError};
