//! Order poller - claims pending orders and hands them to the queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::StoreError;
use crate::ports::{OrderQueue, OrderStore};

pub struct OrderPoller {
    store: Arc<dyn OrderStore>,
    queue: Arc<dyn OrderQueue>,
    batch: usize,
    interval: Duration,
}

impl OrderPoller {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<dyn OrderQueue>,
        batch: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            batch,
            interval,
        }
    }

    /// Claim one batch and publish it. Returns how many orders were
    /// published.
    ///
    /// Claimed orders are already `queued` in the store; one whose publish
    /// fails stays there until an operator intervenes.
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let claimed = self.store.poll_pending(self.batch).await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        debug!(claimed = claimed.len(), "claimed pending orders");

        let mut published = 0;
        for order in &claimed {
            match self.queue.publish_order(order).await {
                Ok(()) => published += 1,
                Err(err) => {
                    error!(order_id = %order.id, error = %err, "publish failed, order stuck in queued")
                }
            }
        }
        Ok(published)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, batch = self.batch, "order poller started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = self.poll_once().await {
                    error!(error = %err, "polling pending orders failed");
                }
            }
            info!("order poller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, OrderStatus};
    use crate::impls::{InMemoryOrderStore, InMemoryQueue};
    use crate::ports::SystemClock;
    use futures::StreamExt;

    #[tokio::test]
    async fn poll_once_claims_and_publishes_a_batch() {
        let store = Arc::new(InMemoryOrderStore::new(Arc::new(SystemClock)));
        let queue = Arc::new(InMemoryQueue::new(10));
        store
            .seed((1..=3).map(|t| NewOrder::new("LATTE", false, t)).collect())
            .await
            .unwrap();
        let poller = OrderPoller::new(store.clone(), queue.clone(), 2, Duration::from_millis(10));

        assert_eq!(poller.poll_once().await.unwrap(), 2);
        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert_eq!(poller.poll_once().await.unwrap(), 0);

        let mut orders = queue.consume_orders(CancellationToken::new()).await.unwrap();
        let first = orders.next().await.unwrap();
        assert_eq!(first.status, OrderStatus::Queued);
        assert!(
            store
                .all()
                .await
                .unwrap()
                .iter()
                .all(|o| o.status == OrderStatus::Queued)
        );
    }

    #[tokio::test]
    async fn spawned_poller_stops_on_shutdown() {
        let store = Arc::new(InMemoryOrderStore::new(Arc::new(SystemClock)));
        let queue = Arc::new(InMemoryQueue::new(10));
        let shutdown = CancellationToken::new();
        let handle = OrderPoller::new(store, queue, 5, Duration::from_millis(5)).spawn(shutdown.clone());

        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
