//! Demo run: four fixed orders through the real device simulators, with an
//! in-memory queue and store.

use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use brewgate_core::app::{PipelineBuilder, StatusCounts};
use brewgate_core::config::GatewayConfig;
use brewgate_core::domain::{NewOrder, OrderStatus};
use brewgate_core::impls::{InMemoryOrderStore, InMemoryQueue};
use brewgate_core::ports::{Clock, OrderStore, SystemClock};

use crate::wiring;

fn demo_orders() -> Vec<NewOrder> {
    vec![
        NewOrder::new("LATTE", true, 7),
        NewOrder::new("AMERICANO", false, 3),
        NewOrder::new("ESPRESSO", false, 5),
        NewOrder::new("MOCHA", true, 8),
    ]
}

pub async fn run(
    config: &GatewayConfig,
    every: Duration,
    deadline: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryOrderStore::new(Arc::clone(&clock)));
    let ids = store.seed(demo_orders()).await?;
    info!(orders = ids.len(), "seeded demo orders");

    let devices = wiring::devices(config);
    wiring::connect_devices(&devices).await;
    let handle = PipelineBuilder::new()
        .devices(devices.clone())
        .queue(Arc::new(InMemoryQueue::new(config.queue_capacity)))
        .store(store.clone())
        .clock(clock)
        .settings(config.pipeline_settings())
        .build()?
        .start();

    let finished =
        tokio::time::timeout(deadline, report_until_done(store.as_ref(), every, &shutdown)).await;

    handle.shutdown_and_join().await;
    let _ = devices.disconnect_all().await;

    for order in store.all().await? {
        if order.status == OrderStatus::Error {
            println!(
                "{} {} ice={} table={} {} {}",
                order.id,
                order.coffee_type,
                order.need_ice,
                order.table_number,
                order.status,
                order.error_message
            );
        } else {
            println!(
                "{} {} ice={} table={} {}",
                order.id, order.coffee_type, order.need_ice, order.table_number, order.status
            );
        }
    }

    match finished {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => {
            info!("demo interrupted");
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_) => bail!("demo orders still unfinished after {deadline:?}"),
    }
}

/// Print counts every `every`. `Ok(false)` when interrupted first.
async fn report_until_done(
    store: &dyn OrderStore,
    every: Duration,
    shutdown: &CancellationToken,
) -> Result<bool> {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(false),
            _ = ticker.tick() => {}
        }
        let counts = StatusCounts::snapshot(store).await?;
        println!("{counts}");
        if counts.all_terminal() {
            return Ok(true);
        }
    }
}
