//! Backing queue stores for cmdpool shards.
//!
//! A shard is a list addressed by key: producers append to the tail and a
//! single consumer removes from the head with a bounded blocking pop.
//!
//! - [`CommandQueue`]: the push / blocking-pop contract.
//! - [`RedisQueue`]: `RPUSH` / `BLPOP` against a Redis server.
//! - [`InMemoryQueue`]: in-process store for tests and single-process runs.

pub mod error;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use redis_store::RedisQueue;

/// List-style store holding serialized commands per shard key.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Append `payload` to the tail of `key`.
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Remove and return the head of `key`, waiting up to `timeout`.
    ///
    /// `Ok(None)` means the list stayed empty for the whole timeout.
    async fn blocking_pop(&self, key: &str, timeout: Duration)
        -> Result<Option<Vec<u8>>, QueueError>;
}
