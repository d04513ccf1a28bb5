//! Device port - one capability set for every machine.
//!
//! Each driver is a flat implementation of `Device` with its own command
//! enum; the pipeline and the dispatcher only ever see the trait.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::{CoffeeType, DeliveryRequest, DeviceKind, DeviceStatus, DriverError};

/// How an operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The device confirmed completion.
    Completed,
    /// The wait window elapsed without confirmation and the driver's policy
    /// treats that as success (robot soft timeout).
    Unacknowledged,
}

#[async_trait]
pub trait Device: Send + Sync {
    type Command: fmt::Debug + Send + 'static;

    fn kind(&self) -> DeviceKind;

    /// Open the session eagerly. Operations open it lazily otherwise.
    async fn connect(&self) -> Result<(), DriverError>;

    async fn disconnect(&self) -> Result<(), DriverError>;

    /// Fresh snapshot; never cached.
    async fn query_status(&self) -> Result<DeviceStatus, DriverError>;

    /// Run one command to completion (or to its own timeout).
    async fn execute(&self, command: Self::Command) -> Result<Ack, DriverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrinderCommand {
    /// Restock first if needed, then grind.
    GrindAuto,
    Restock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrewerCommand {
    Make(CoffeeType),
    RefillAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceCommand {
    ProduceUntil { min_stock: i16 },
    Dispense { amount: i16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotCommand {
    Deliver(DeliveryRequest),
}

pub type DynGrinder = Arc<dyn Device<Command = GrinderCommand>>;
pub type DynBrewer = Arc<dyn Device<Command = BrewerCommand>>;
pub type DynIceMaker = Arc<dyn Device<Command = IceCommand>>;
pub type DynRobot = Arc<dyn Device<Command = RobotCommand>>;

/// One driver per device class.
#[derive(Clone)]
pub struct DeviceSet {
    pub grinder: DynGrinder,
    pub brewer: DynBrewer,
    pub ice_maker: DynIceMaker,
    pub robot: DynRobot,
}

impl DeviceSet {
    /// Connect every device, stopping at the first failure.
    pub async fn connect_all(&self) -> Result<(), DriverError> {
        self.grinder.connect().await?;
        self.brewer.connect().await?;
        self.ice_maker.connect().await?;
        self.robot.connect().await?;
        Ok(())
    }

    /// Disconnect every device; returns the first error after trying all.
    pub async fn disconnect_all(&self) -> Result<(), DriverError> {
        let results = [
            self.grinder.disconnect().await,
            self.brewer.disconnect().await,
            self.ice_maker.disconnect().await,
            self.robot.disconnect().await,
        ];
        results.into_iter().collect()
    }

    pub async fn query_status(&self, kind: DeviceKind) -> Result<DeviceStatus, DriverError> {
        match kind {
            DeviceKind::Grinder => self.grinder.query_status().await,
            DeviceKind::CoffeeMachine => self.brewer.query_status().await,
            DeviceKind::IceMaker => self.ice_maker.query_status().await,
            DeviceKind::DeliveryRobot => self.robot.query_status().await,
        }
    }
}
