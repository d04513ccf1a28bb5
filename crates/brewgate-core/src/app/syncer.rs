//! Result syncer - writes order results back to the store.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::OrderResult;
use crate::ports::{OrderQueue, OrderStore};

pub struct ResultSyncer {
    store: Arc<dyn OrderStore>,
    queue: Arc<dyn OrderQueue>,
}

impl ResultSyncer {
    pub fn new(store: Arc<dyn OrderStore>, queue: Arc<dyn OrderQueue>) -> Self {
        Self { store, queue }
    }

    /// Apply one result. Returns whether the order changed; store errors are
    /// logged and reported as `false`.
    pub async fn apply(&self, result: &OrderResult) -> bool {
        match self.store.update_result(result).await {
            Ok(true) => {
                debug!(order_id = %result.order_id, status = %result.terminal_status(), "order updated");
                true
            }
            Ok(false) => {
                debug!(order_id = %result.order_id, "result ignored, order not in queued");
                false
            }
            Err(err) => {
                error!(order_id = %result.order_id, error = %err, "failed to store order result");
                false
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut results = match self.queue.consume_results(shutdown).await {
                Ok(results) => results,
                Err(err) => {
                    error!(error = %err, "cannot consume results, syncer not started");
                    return;
                }
            };
            info!("result syncer started");
            while let Some(result) = results.next().await {
                self.apply(&result).await;
            }
            info!("result syncer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, OrderStatus};
    use crate::impls::{InMemoryOrderStore, InMemoryQueue};
    use crate::ports::SystemClock;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn results_reach_the_store_once() {
        let store = Arc::new(InMemoryOrderStore::new(Arc::new(SystemClock)));
        let queue = Arc::new(InMemoryQueue::new(10));
        let ids = store
            .seed(vec![NewOrder::new("MOCHA", false, 3)])
            .await
            .unwrap();
        store.poll_pending(1).await.unwrap();

        let result = OrderResult::failed(ids[0], Utc::now(), "ERROR:UNKNOWN_COFFEE_TYPE");
        queue.publish_result(&result).await.unwrap();
        queue.publish_result(&result).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = ResultSyncer::new(store.clone(), queue.clone()).spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let order = &store.all().await.unwrap()[0];
        assert_eq!(order.status, OrderStatus::Error);
        assert_eq!(order.error_message, "ERROR:UNKNOWN_COFFEE_TYPE");
        assert_eq!(queue.depth().await, (0, 0));
    }
}
