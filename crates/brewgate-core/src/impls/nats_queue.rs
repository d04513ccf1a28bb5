//! NatsQueue - durable order/result channels on NATS JetStream.
//!
//! One stream per channel, file storage, work-queue retention: a message
//! leaves the stream once a consumer acks it. Consumers are durable pull
//! consumers, so every pipeline instance sharing the durable name competes
//! for the same messages. Messages are acked on receipt, before processing.

use async_nats::jetstream::{self, consumer::pull, stream};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Order, OrderResult, QueueError};
use crate::ports::OrderQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    pub url: String,
    pub orders_stream: String,
    pub results_stream: String,
    pub connect_timeout: Duration,
}

impl NatsSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            orders_stream: "orders".to_string(),
            results_stream: "results".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct NatsQueue {
    jetstream: jetstream::Context,
    settings: NatsSettings,
}

fn broker(err: impl std::fmt::Display) -> QueueError {
    QueueError::Broker(err.to_string())
}

impl NatsQueue {
    /// Connect and declare both streams.
    pub async fn connect(settings: NatsSettings) -> Result<Self, QueueError> {
        info!(url = %settings.url, "connecting to NATS");
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(settings.connect_timeout)
            .connect(&settings.url)
            .await
            .map_err(broker)?;
        let queue = Self {
            jetstream: jetstream::new(client),
            settings,
        };
        queue.ensure_stream(&queue.settings.orders_stream).await?;
        queue.ensure_stream(&queue.settings.results_stream).await?;
        Ok(queue)
    }

    async fn ensure_stream(&self, name: &str) -> Result<stream::Stream, QueueError> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: name.to_string(),
                subjects: vec![name.to_string()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(broker)?;
        debug!(stream = name, "stream ready");
        Ok(stream)
    }

    async fn publish<T: Serialize>(&self, subject: &str, message: &T) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message)?;
        self.jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(broker)?
            .await
            .map_err(broker)?;
        Ok(())
    }

    async fn consume<T>(
        &self,
        stream_name: &str,
        durable: &str,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, T>, QueueError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let stream = self.ensure_stream(stream_name).await?;
        let consumer = stream
            .get_or_create_consumer(
                durable,
                pull::Config {
                    durable_name: Some(durable.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(broker)?;
        let messages = Box::pin(consumer.messages().await.map_err(broker)?);
        info!(stream = stream_name, consumer = durable, "consuming");

        Ok(futures::stream::unfold(
            (messages, shutdown),
            |(mut messages, shutdown)| async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return None,
                        next = messages.next() => next,
                    };
                    let message = match next? {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "jetstream receive failed");
                            continue;
                        }
                    };
                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "ack failed");
                    }
                    match serde_json::from_slice::<T>(&message.payload) {
                        Ok(value) => return Some((value, (messages, shutdown))),
                        Err(e) => warn!(error = %e, subject = %message.subject, "skipping malformed message"),
                    }
                }
            },
        )
        .boxed())
    }
}

#[async_trait]
impl OrderQueue for NatsQueue {
    async fn publish_order(&self, order: &Order) -> Result<(), QueueError> {
        self.publish(&self.settings.orders_stream, order).await
    }

    async fn consume_orders(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, Order>, QueueError> {
        self.consume(&self.settings.orders_stream, "brewgate-pipeline", shutdown)
            .await
    }

    async fn publish_result(&self, result: &OrderResult) -> Result<(), QueueError> {
        self.publish(&self.settings.results_stream, result).await
    }

    async fn consume_results(
        &self,
        shutdown: CancellationToken,
    ) -> Result<BoxStream<'static, OrderResult>, QueueError> {
        self.consume(&self.settings.results_stream, "brewgate-syncer", shutdown)
            .await
    }
}
