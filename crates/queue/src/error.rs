/// Errors from a backing queue store.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Connection, protocol or command failure reported by Redis.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The configured address cannot be turned into a connection URL.
    #[error("Invalid queue address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}
