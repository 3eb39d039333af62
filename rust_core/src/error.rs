use thiserror::Error;

/// Failures talking to the prediction store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A guarded write kept losing to concurrent writers
    #[error("Write conflict: {0}")]
    Conflict(String),
}

/// Main library error type
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
