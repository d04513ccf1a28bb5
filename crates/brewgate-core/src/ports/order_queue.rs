//! OrderQueue port - moves orders to the pipeline and results back.
//!
//! # Implementations
//! - `InMemoryQueue`: bounded in-process buffers (demo, tests)
//! - `NatsQueue`: durable JetStream streams

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::domain::{Order, OrderResult, QueueError};

/// Two channels (orders, results) behind one contract.
///
/// Consumption is a live stream that ends when `shutdown` fires. Each call
/// starts a fresh subscriber; the queue owns a message only between publish
/// and consume.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Waits for room when the backend is bounded.
    async fn publish_order(&self, order: &Order) -> Result<(), QueueError>;

    async fn consume_orders(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, Order>, QueueError>;

    async fn publish_result(&self, result: &OrderResult) -> Result<(), QueueError>;

    async fn consume_results(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, OrderResult>, QueueError>;
}
