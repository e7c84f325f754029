use std::result::Result as StdResult;
use thiserror::Error;

/// Errors raised while starting or talking to a test container.
#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("failed to run test container: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("redis fixture connection failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result of a fixture operation.
pub type Result<T> = StdResult<T, TestInfraError>;
