use thiserror::Error;
use tinylink_core::{CacheError, CoreError, StorageError};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A live record already owns the requested custom code.
    #[error("short code already taken: {0}")]
    CodeTaken(String),
    #[error("no free short code after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },
    #[error("short link not found: {0}")]
    NotFound(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),
    #[error("storage error: {0}")]
    Store(#[from] StorageError),
    /// Only raised by maintenance paths; request paths log cache failures instead.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<CoreError> for EngineError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}
