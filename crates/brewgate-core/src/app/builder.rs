//! PipelineBuilder - wiring for a complete gateway.
//!
//! Fail-fast: `build()` refuses to produce a gateway with a missing
//! component instead of failing later inside a background loop.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::dispatch::CommandDispatcher;
use super::handle::GatewayHandle;
use super::permits::DevicePermits;
use super::pipeline::{IcePlan, OrderPipeline};
use super::poller::OrderPoller;
use super::status::spawn_reporter;
use super::syncer::ResultSyncer;
use crate::ports::{Clock, DeviceSet, OrderQueue, OrderStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub ice: IcePlan,
    pub poll_interval: Duration,
    pub poll_batch: usize,
    /// Log order counts this often; `None` disables the reporter.
    pub status_interval: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ice: IcePlan::default(),
            poll_interval: Duration::from_millis(500),
            poll_batch: 50,
            status_interval: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}. It must be supplied before build().")]
    Missing(&'static str),
}

#[derive(Default)]
pub struct PipelineBuilder {
    devices: Option<DeviceSet>,
    queue: Option<Arc<dyn OrderQueue>>,
    store: Option<Arc<dyn OrderStore>>,
    clock: Option<Arc<dyn Clock>>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(mut self, devices: DeviceSet) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn OrderQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Gateway, BuildError> {
        let devices = self.devices.ok_or(BuildError::Missing("devices"))?;
        let queue = self.queue.ok_or(BuildError::Missing("queue"))?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let clock = self.clock.ok_or(BuildError::Missing("clock"))?;

        let permits = Arc::new(DevicePermits::new());
        let pipeline = Arc::new(OrderPipeline::new(
            devices.clone(),
            Arc::clone(&permits),
            Arc::clone(&queue),
            clock,
            self.settings.ice,
        ));
        Ok(Gateway {
            poller: OrderPoller::new(
                Arc::clone(&store),
                Arc::clone(&queue),
                self.settings.poll_batch,
                self.settings.poll_interval,
            ),
            syncer: ResultSyncer::new(Arc::clone(&store), queue),
            pipeline,
            devices,
            permits,
            store,
            settings: self.settings,
        })
    }
}

/// A wired gateway, not yet running.
pub struct Gateway {
    pipeline: Arc<OrderPipeline>,
    poller: OrderPoller,
    syncer: ResultSyncer,
    devices: DeviceSet,
    permits: Arc<DevicePermits>,
    store: Arc<dyn OrderStore>,
    settings: PipelineSettings,
}

impl Gateway {
    /// Dispatcher sharing this gateway's device permits.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.devices.clone(), self.settings.ice)
            .with_permits(Arc::clone(&self.permits))
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn store(&self) -> Arc<dyn OrderStore> {
        Arc::clone(&self.store)
    }

    pub fn pipeline(&self) -> Arc<OrderPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Spawn poller, intake and syncer. Must run inside a Tokio runtime.
    pub fn start(self) -> GatewayHandle {
        let shutdown = CancellationToken::new();
        let mut joins = vec![
            self.syncer.spawn(shutdown.clone()),
            Arc::clone(&self.pipeline).spawn_intake(shutdown.clone()),
            self.poller.spawn(shutdown.clone()),
        ];
        if let Some(every) = self.settings.status_interval {
            joins.push(spawn_reporter(self.store, every, shutdown.clone()));
        }
        info!(
            poll_interval = ?self.settings.poll_interval,
            poll_batch = self.settings.poll_batch,
            "gateway started"
        );
        GatewayHandle::new(shutdown, joins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryOrderStore, InMemoryQueue};
    use crate::ports::SystemClock;

    #[test]
    fn build_fails_fast_on_the_first_missing_component() {
        let result = PipelineBuilder::new()
            .queue(Arc::new(InMemoryQueue::new(1)))
            .store(Arc::new(InMemoryOrderStore::new(Arc::new(SystemClock))))
            .clock(Arc::new(SystemClock))
            .build();

        assert!(matches!(result, Err(BuildError::Missing("devices"))));
    }

    #[test]
    fn error_message_names_the_component() {
        let err = PipelineBuilder::new()
            .queue(Arc::new(InMemoryQueue::new(1)))
            .build()
            .err()
            .unwrap();

        assert_eq!(
            err.to_string(),
            "missing component: devices. It must be supplied before build()."
        );
    }
}
