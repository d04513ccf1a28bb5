//! CommandDispatcher - one uniform command, one driver call.
//!
//! Backs the synchronous command endpoint. When it shares the pipeline's
//! permits, a direct command waits for the device like any order step.

use std::sync::Arc;
use tracing::{info, warn};

use super::pipeline::IcePlan;
use super::permits::DevicePermits;
use crate::domain::{CoffeeType, CommandReply, DeliveryRequest, DeviceKind, DriverError, UnifiedCommand};
use crate::ports::{BrewerCommand, DeviceSet, GrinderCommand, IceCommand, RobotCommand};

pub struct CommandDispatcher {
    devices: DeviceSet,
    permits: Option<Arc<DevicePermits>>,
    ice: IcePlan,
}

impl CommandDispatcher {
    pub fn new(devices: DeviceSet, ice: IcePlan) -> Self {
        Self {
            devices,
            permits: None,
            ice,
        }
    }

    pub fn with_permits(mut self, permits: Arc<DevicePermits>) -> Self {
        self.permits = Some(permits);
        self
    }

    pub async fn dispatch(&self, command: UnifiedCommand) -> CommandReply {
        let Ok(device) = command.device.parse::<DeviceKind>() else {
            return CommandReply::fail("unknown_device");
        };
        let action = command.action.trim().to_ascii_lowercase();
        let operation = match self.resolve(device, &action, &command) {
            Ok(operation) => operation,
            Err(reason) => return CommandReply::fail(reason),
        };

        let _permit = match &self.permits {
            Some(permits) => Some(permits.acquire(device).await),
            None => None,
        };
        let outcome = self.run(device, operation).await;
        reply(device, &action, outcome)
    }

    /// Map (device, action) onto a driver call without touching the device.
    fn resolve(
        &self,
        device: DeviceKind,
        action: &str,
        command: &UnifiedCommand,
    ) -> Result<Operation, &'static str> {
        let operation = match (device, action) {
            (_, "status") => Operation::Status,
            (DeviceKind::Grinder, "grind") => Operation::Grinder(GrinderCommand::GrindAuto, "grind_done"),
            (DeviceKind::Grinder, "restock") => Operation::Grinder(GrinderCommand::Restock, "restock_ok"),
            (DeviceKind::CoffeeMachine, "make") => {
                let coffee = CoffeeType::new(&command.coffee_type);
                if coffee.is_empty() {
                    return Err("coffee_type required");
                }
                Operation::Brewer(BrewerCommand::Make(coffee), "coffee_done")
            }
            (DeviceKind::CoffeeMachine, "refill_all") => {
                Operation::Brewer(BrewerCommand::RefillAll, "refill_ok")
            }
            (DeviceKind::IceMaker, "produce") => {
                let min_stock = if command.ice_amount > 0 {
                    command.ice_amount
                } else {
                    self.ice.min_stock
                };
                Operation::Ice(IceCommand::ProduceUntil { min_stock }, "ice_ready")
            }
            (DeviceKind::IceMaker, "dispense") => {
                let amount = if command.ice_amount > 0 {
                    command.ice_amount
                } else {
                    self.ice.dispense_amount
                };
                Operation::Ice(IceCommand::Dispense { amount }, "ice_dispensed")
            }
            (DeviceKind::DeliveryRobot, "deliver") => Operation::Robot(RobotCommand::Deliver(DeliveryRequest {
                order_id: command.order_id.clone(),
                coffee_type: CoffeeType::new(&command.coffee_type),
                need_ice: command.need_ice,
                table_number: command.table_number,
            })),
            _ => return Err("unknown_action"),
        };
        Ok(operation)
    }

    async fn run(&self, device: DeviceKind, operation: Operation) -> Result<String, DriverError> {
        let done = match operation {
            Operation::Status => {
                let status = self.devices.query_status(device).await?;
                return Ok(serde_json::to_string(&status)?);
            }
            Operation::Grinder(cmd, done) => {
                self.devices.grinder.execute(cmd).await?;
                done
            }
            Operation::Brewer(cmd, done) => {
                self.devices.brewer.execute(cmd).await?;
                done
            }
            Operation::Ice(cmd, done) => {
                self.devices.ice_maker.execute(cmd).await?;
                done
            }
            Operation::Robot(cmd) => {
                self.devices.robot.execute(cmd).await?;
                "order_sent"
            }
        };
        Ok(done.to_string())
    }
}

/// A validated command plus the reply message on success.
enum Operation {
    Status,
    Grinder(GrinderCommand, &'static str),
    Brewer(BrewerCommand, &'static str),
    Ice(IceCommand, &'static str),
    Robot(RobotCommand),
}

fn reply(device: DeviceKind, action: &str, outcome: Result<String, DriverError>) -> CommandReply {
    match outcome {
        Ok(message) => {
            info!(device = %device, action, "command done");
            CommandReply::ok(message)
        }
        Err(err) => {
            warn!(device = %device, action, error = %err, "command failed");
            CommandReply::fail(err.to_string())
        }
    }
}
