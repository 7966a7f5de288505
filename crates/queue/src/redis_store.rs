//! Redis-backed [`CommandQueue`] using `RPUSH` / `BLPOP`.
//!
//! Two multiplexed connections are kept per store: one for pushes and one
//! for blocking pops. Redis serves a connection's commands in order, so a
//! `BLPOP` in flight on a shared connection would hold back every push
//! issued by the enqueue loop until it returned.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::{CommandQueue, QueueError};

const REDIS_SCHEME: &str = "redis://";

/// Shard lists stored in a single Redis server.
#[derive(Clone)]
pub struct RedisQueue {
    address: String,
    push_conn: MultiplexedConnection,
    pop_conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RedisQueue {
    /// Connect to the Redis server at `address`.
    ///
    /// Accepts either a full `redis://` / `rediss://` URL or a bare
    /// `host:port`.
    pub async fn connect(address: &str) -> Result<Self, QueueError> {
        let url = connection_url(address)?;
        let client = redis::Client::open(url.as_str())?;

        let push_conn = client.get_multiplexed_async_connection().await?;
        let pop_conn = client.get_multiplexed_async_connection().await?;

        tracing::info!(address, "Connected to Redis queue");

        Ok(Self {
            address: address.to_string(),
            push_conn,
            pop_conn,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl CommandQueue for RedisQueue {
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.push_conn.clone();
        let _len: i64 = conn.rpush(key, payload).await?;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let mut conn = self.pop_conn.clone();
        // Nil reply on timeout; otherwise [key, element].
        let reply: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|(_, payload)| payload))
    }
}

/// Turn a configured address into a connection URL.
pub fn connection_url(address: &str) -> Result<String, QueueError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(QueueError::InvalidAddress {
            address: address.to_string(),
            reason: "address is empty".to_string(),
        });
    }

    if address.contains("://") {
        Ok(address.to_string())
    } else {
        Ok(format!("{REDIS_SCHEME}{address}"))
    }
}
