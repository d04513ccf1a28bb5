//! InMemoryQueue - bounded in-process order/result channels.
//!
//! # Implementation
//! - `tokio::sync::Mutex<VecDeque<T>>` per channel
//! - `Notify` pair: `readable` wakes consumers, `writable` wakes blocked
//!   publishers
//! - every `consume_*` call returns a new competing subscriber

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::domain::{Order, OrderResult, QueueError};
use crate::ports::OrderQueue;

struct Channel<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

impl<T: Send + 'static> Channel<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Blocks while the buffer is full.
    async fn push(&self, item: T) {
        loop {
            {
                let mut buf = self.buf.lock().await;
                if buf.len() < self.capacity {
                    buf.push_back(item);
                    self.readable.notify_one();
                    return;
                }
            }
            self.writable.notified().await;
        }
    }

    async fn pop(&self) -> T {
        loop {
            {
                let mut buf = self.buf.lock().await;
                if let Some(item) = buf.pop_front() {
                    self.writable.notify_one();
                    if !buf.is_empty() {
                        // pass the wakeup on to the next consumer
                        self.readable.notify_one();
                    }
                    return item;
                }
            }
            self.readable.notified().await;
        }
    }

    async fn len(&self) -> usize {
        self.buf.lock().await.len()
    }

    /// Live sequence that ends once `shutdown` fires.
    fn subscribe(self: Arc<Self>, shutdown: CancellationToken) -> BoxStream<'static, T> {
        stream::unfold((self, shutdown), |(channel, shutdown)| async move {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                item = channel.pop() => Some(item),
            };
            item.map(|item| (item, (channel, shutdown)))
        })
        .boxed()
    }
}

pub struct InMemoryQueue {
    orders: Arc<Channel<Order>>,
    results: Arc<Channel<OrderResult>>,
}

impl InMemoryQueue {
    /// Both channels hold at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            orders: Arc::new(Channel::new(capacity)),
            results: Arc::new(Channel::new(capacity)),
        }
    }

    /// Messages waiting on each channel: `(orders, results)`.
    pub async fn depth(&self) -> (usize, usize) {
        (self.orders.len().await, self.results.len().await)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl OrderQueue for InMemoryQueue {
    async fn publish_order(&self, order: &Order) -> Result<(), QueueError> {
        self.orders.push(order.clone()).await;
        Ok(())
    }

    async fn consume_orders(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, Order>, QueueError> {
        Ok(Arc::clone(&self.orders).subscribe(shutdown))
    }

    async fn publish_result(&self, result: &OrderResult) -> Result<(), QueueError> {
        self.results.push(result.clone()).await;
        Ok(())
    }

    async fn consume_results(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, OrderResult>, QueueError> {
        Ok(Arc::clone(&self.results).subscribe(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoffeeType, OrderId, OrderStatus};
    use chrono::Utc;
    use std::time::Duration;

    fn order(id: i64) -> Order {
        Order {
            id: OrderId::new(id),
            coffee_type: CoffeeType::new("LATTE"),
            need_ice: false,
            table_number: 1,
            created_at: Utc::now(),
            status: OrderStatus::Queued,
            finished_at: None,
            error_message: String::new(),
        }
    }

    #[tokio::test]
    async fn orders_come_out_in_publish_order() {
        let queue = InMemoryQueue::new(10);
        for id in 1..=3 {
            queue.publish_order(&order(id)).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let mut orders = queue.consume_orders(shutdown.clone()).await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(orders.next().await.unwrap().id.get());
        }

        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn publish_blocks_while_full() {
        let queue = Arc::new(InMemoryQueue::new(1));
        queue.publish_order(&order(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.publish_order(&order(2))).await;
        assert!(blocked.is_err());

        let publisher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.publish_order(&order(3)).await })
        };
        let mut orders = queue.consume_orders(CancellationToken::new()).await.unwrap();
        assert_eq!(orders.next().await.unwrap().id.get(), 1);
        publisher.await.unwrap().unwrap();
        assert_eq!(orders.next().await.unwrap().id.get(), 3);
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let queue = InMemoryQueue::new(4);
        let shutdown = CancellationToken::new();
        let mut results = queue.consume_results(shutdown.clone()).await.unwrap();

        shutdown.cancel();

        assert!(results.next().await.is_none());
    }

    #[tokio::test]
    async fn a_new_subscriber_picks_up_where_the_last_one_stopped() {
        let queue = InMemoryQueue::new(4);
        queue
            .publish_result(&OrderResult::succeeded(OrderId::new(1), Utc::now()))
            .await
            .unwrap();
        queue
            .publish_result(&OrderResult::succeeded(OrderId::new(2), Utc::now()))
            .await
            .unwrap();

        let first = CancellationToken::new();
        let mut results = queue.consume_results(first.clone()).await.unwrap();
        assert_eq!(results.next().await.unwrap().order_id.get(), 1);
        first.cancel();
        drop(results);

        let mut results = queue.consume_results(CancellationToken::new()).await.unwrap();
        assert_eq!(results.next().await.unwrap().order_id.get(), 2);
        assert_eq!(queue.depth().await, (0, 0));
    }
}
