//! Pending request registry.
//!
//! Turns an asynchronous reply channel into request/response: the caller
//! registers a key before sending, the transport's receive loop completes the
//! key when a matching reply arrives. Each entry is single-use and removed
//! on completion, cancellation or timeout, so a late reply finds nothing and
//! is dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

pub struct PendingRequests<K, V> {
    waiting: Mutex<HashMap<K, oneshot::Sender<V>>>,
}

impl<K, V> PendingRequests<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Register `key`. A previous waiter under the same key is discarded and
    /// sees its channel close.
    pub async fn register(&self, key: K) -> oneshot::Receiver<V> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(key, tx);
        rx
    }

    /// Deliver `value` to whoever waits on `key`. Returns false when nobody
    /// does (never registered, already completed, or timed out).
    pub async fn complete(&self, key: &K, value: V) -> bool {
        let Some(tx) = self.waiting.lock().await.remove(key) else {
            return false;
        };
        tx.send(value).is_ok()
    }

    pub async fn cancel(&self, key: &K) -> bool {
        self.waiting.lock().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.waiting.lock().await.is_empty()
    }

    /// Wait up to `timeout` for the reply to `key`. The entry is gone
    /// afterwards whatever the outcome.
    pub async fn wait(&self, key: &K, reply: oneshot::Receiver<V>, timeout: Duration) -> Option<V> {
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => None,
            Err(_) => {
                self.cancel(key).await;
                None
            }
        }
    }
}

impl<K, V> Default for PendingRequests<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn completion_reaches_the_waiter_once() {
        let pending = Arc::new(PendingRequests::<String, u32>::new());
        let rx = pending.register("a".into()).await;

        let responder = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.complete(&"a".to_string(), 7).await })
        };

        let got = pending
            .wait(&"a".to_string(), rx, Duration::from_secs(1))
            .await;
        assert_eq!(got, Some(7));
        assert!(responder.await.unwrap());
        assert!(!pending.complete(&"a".to_string(), 8).await);
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn timeout_removes_the_entry_and_drops_late_replies() {
        let pending = PendingRequests::<String, u32>::new();
        let rx = pending.register("slow".into()).await;

        let got = pending
            .wait(&"slow".to_string(), rx, Duration::from_millis(10))
            .await;

        assert_eq!(got, None);
        assert_eq!(pending.len().await, 0);
        assert!(!pending.complete(&"slow".to_string(), 1).await);
    }

    #[tokio::test]
    async fn unknown_keys_are_ignored() {
        let pending = PendingRequests::<u64, ()>::new();
        assert!(!pending.complete(&42, ()).await);
        assert!(!pending.cancel(&42).await);
    }

    #[tokio::test]
    async fn re_registering_a_key_closes_the_old_waiter() {
        let pending = PendingRequests::<u64, u8>::new();
        let first = pending.register(1).await;
        let second = pending.register(1).await;

        assert!(pending.complete(&1, 9).await);
        assert!(first.await.is_err());
        assert_eq!(second.await.unwrap(), 9);
    }
}
