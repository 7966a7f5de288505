//! In-process [`CommandQueue`] with the same FIFO / blocking-pop semantics
//! as the Redis store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{CommandQueue, QueueError};

/// Shard lists kept in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    pushed: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently stored under `key`.
    pub fn len(&self, key: &str) -> usize {
        self.lists().get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Keys holding at least one payload, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lists()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn try_pop(&self, key: &str) -> Option<Vec<u8>> {
        self.lists().get_mut(key).and_then(VecDeque::pop_front)
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Vec<u8>>>> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CommandQueue for InMemoryQueue {
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.lists()
            .entry(key.to_string())
            .or_default()
            .push_back(payload);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.try_pop(key) {
                return Ok(Some(payload));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop(key));
            }
        }
    }
}
