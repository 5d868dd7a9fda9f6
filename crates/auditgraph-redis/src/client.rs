//! Redis connection pool management.

use auditgraph_core::QueueError;
use redis::aio::ConnectionManager;
use thiserror::Error;

/// Redis error types.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisError>;

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::Connection(e) => QueueError::Backend(e.to_string()),
            RedisError::Serialization(e) => QueueError::Serialization(e),
            RedisError::NotFound(id) => QueueError::NotFound(id),
        }
    }
}

/// Redis connection pool. `ConnectionManager` multiplexes and
/// reconnects internally. Clone it to get a handle for each operation.
pub type RedisPool = ConnectionManager;

/// Initialize a Redis connection pool from a URL.
///
/// Example URL: `redis://127.0.0.1:6379`
pub async fn init_pool(redis_url: &str) -> RedisResult<RedisPool> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}
