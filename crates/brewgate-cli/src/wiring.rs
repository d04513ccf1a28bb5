//! Builds drivers and backends from `GatewayConfig`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use brewgate_core::app::{Gateway, PipelineBuilder};
use brewgate_core::config::{GatewayConfig, QueueBackend, StoreBackend};
use brewgate_core::drivers::{
    CoffeeMachineDriver, DeliveryRobotDriver, GrinderDriver, IceMakerDriver,
};
use brewgate_core::impls::{InMemoryOrderStore, InMemoryQueue, NatsQueue, PgOrderStore};
use brewgate_core::ports::{Clock, DeviceSet, OrderQueue, OrderStore, SystemClock, UlidGenerator};

pub fn devices(config: &GatewayConfig) -> DeviceSet {
    DeviceSet {
        grinder: Arc::new(GrinderDriver::modbus(
            config.grinder_addr(),
            config.grinder_unit_id,
            config.grinder_options(),
        )),
        brewer: Arc::new(CoffeeMachineDriver::new(
            config.coffee_addr(),
            config.coffee_options(),
        )),
        ice_maker: Arc::new(IceMakerDriver::s7(
            config.ice_addr(),
            config.ice_rack,
            config.ice_slot,
            config.ice_options(),
        )),
        robot: Arc::new(DeliveryRobotDriver::mqtt(
            config.mqtt_settings(),
            Arc::new(UlidGenerator::new(SystemClock)),
            config.robot_options(),
        )),
    }
}

/// Connect eagerly so misconfigured endpoints show up at startup. Drivers
/// reconnect on first use, so a failure here is only a warning.
pub async fn connect_devices(devices: &DeviceSet) {
    match devices.connect_all().await {
        Ok(()) => info!("all devices connected"),
        Err(err) => warn!(error = %err, "device not reachable yet, will retry on first use"),
    }
}

pub async fn queue(config: &GatewayConfig) -> Result<Arc<dyn OrderQueue>> {
    match config.queue_backend {
        QueueBackend::Memory => Ok(Arc::new(InMemoryQueue::new(config.queue_capacity))),
        QueueBackend::Nats => {
            let queue = NatsQueue::connect(config.nats_settings())
                .await
                .with_context(|| format!("failed to connect to NATS at {}", config.nats_url))?;
            Ok(Arc::new(queue))
        }
    }
}

pub async fn store(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn OrderStore>> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryOrderStore::new(clock))),
        StoreBackend::Postgres => {
            let store = PgOrderStore::connect(&config.database_url, config.database_max_connections)
                .await
                .context("failed to connect to PostgreSQL")?;
            store
                .ensure_schema()
                .await
                .context("failed to create the orders table")?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn gateway(config: &GatewayConfig) -> Result<Gateway> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let devices = devices(config);
    connect_devices(&devices).await;

    let gateway = PipelineBuilder::new()
        .devices(devices)
        .queue(queue(config).await?)
        .store(store(config, Arc::clone(&clock)).await?)
        .clock(clock)
        .settings(config.pipeline_settings())
        .build()?;
    Ok(gateway)
}
