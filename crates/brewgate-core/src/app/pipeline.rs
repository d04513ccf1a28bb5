//! Order pipeline core.
//!
//! One task per in-flight order. Each step holds its device permit for the
//! duration of the driver call only, so different orders overlap on
//! different devices. The first failing step ends the order; there are no
//! retries at this level.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::permits::DevicePermits;
use crate::domain::{DeliveryRequest, DeviceKind, DriverError, Order, OrderResult};
use crate::ports::{
    Ack, BrewerCommand, Clock, DeviceSet, GrinderCommand, IceCommand, OrderQueue, RobotCommand,
};

/// Ice parameters used for every order that asks for ice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcePlan {
    pub min_stock: i16,
    pub dispense_amount: i16,
}

impl Default for IcePlan {
    fn default() -> Self {
        Self {
            min_stock: 200,
            dispense_amount: 100,
        }
    }
}

pub struct OrderPipeline {
    devices: DeviceSet,
    permits: Arc<DevicePermits>,
    queue: Arc<dyn OrderQueue>,
    clock: Arc<dyn Clock>,
    ice: IcePlan,
}

impl OrderPipeline {
    pub fn new(
        devices: DeviceSet,
        permits: Arc<DevicePermits>,
        queue: Arc<dyn OrderQueue>,
        clock: Arc<dyn Clock>,
        ice: IcePlan,
    ) -> Self {
        Self {
            devices,
            permits,
            queue,
            clock,
            ice,
        }
    }

    /// Run every step for `order` and publish its result. The result is
    /// returned as well; a failed publish is logged, not retried.
    pub async fn process(&self, order: Order) -> OrderResult {
        info!(need_ice = order.need_ice, table = order.table_number, "processing order");
        let outcome = self.run_steps(&order).await;
        let finished_at = self.clock.now();
        let result = match outcome {
            Ok(()) => {
                info!("order done");
                OrderResult::succeeded(order.id, finished_at)
            }
            Err(err) => {
                warn!(error = %err, "order failed");
                OrderResult::failed(order.id, finished_at, err.to_string())
            }
        };
        if let Err(err) = self.queue.publish_result(&result).await {
            error!(error = %err, "failed to publish order result");
        }
        result
    }

    async fn run_steps(&self, order: &Order) -> Result<(), DriverError> {
        {
            let _permit = self.permits.acquire(DeviceKind::Grinder).await;
            debug!("grinding");
            self.devices.grinder.execute(GrinderCommand::GrindAuto).await?;
        }
        {
            let _permit = self.permits.acquire(DeviceKind::CoffeeMachine).await;
            debug!("brewing");
            self.devices
                .brewer
                .execute(BrewerCommand::Make(order.coffee_type.clone()))
                .await?;
        }
        if order.need_ice {
            let _permit = self.permits.acquire(DeviceKind::IceMaker).await;
            debug!(min_stock = self.ice.min_stock, amount = self.ice.dispense_amount, "adding ice");
            self.devices
                .ice_maker
                .execute(IceCommand::ProduceUntil {
                    min_stock: self.ice.min_stock,
                })
                .await?;
            self.devices
                .ice_maker
                .execute(IceCommand::Dispense {
                    amount: self.ice.dispense_amount,
                })
                .await?;
        }
        {
            let _permit = self.permits.acquire(DeviceKind::DeliveryRobot).await;
            debug!("delivering");
            let ack = self
                .devices
                .robot
                .execute(RobotCommand::Deliver(DeliveryRequest {
                    order_id: Some(order.id.to_string()),
                    coffee_type: order.coffee_type.clone(),
                    need_ice: order.need_ice,
                    table_number: order.table_number,
                }))
                .await?;
            if ack == Ack::Unacknowledged {
                debug!("delivery not acknowledged in time, counted as delivered");
            }
        }
        Ok(())
    }

    /// Consume orders until `shutdown` and process each on its own task.
    /// Order tasks already running are left to finish.
    pub fn spawn_intake(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut orders = match self.queue.consume_orders(shutdown.clone()).await {
                Ok(orders) => orders,
                Err(err) => {
                    error!(error = %err, "cannot consume orders, intake not started");
                    return;
                }
            };
            info!("order intake started");
            while let Some(order) = orders.next().await {
                let pipeline = Arc::clone(&self);
                let span = info_span!("order", order_id = %order.id, coffee = %order.coffee_type);
                tokio::spawn(
                    async move {
                        pipeline.process(order).await;
                    }
                    .instrument(span),
                );
            }
            info!("order intake stopped");
        })
    }
}
