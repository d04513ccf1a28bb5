//! Device protocol drivers.
//!
//! One flat `Device` implementation per machine:
//! - `GrinderDriver`: holding registers over Modbus TCP
//! - `CoffeeMachineDriver`: newline-terminated text over TCP
//! - `IceMakerDriver`: data block 1 of an S7 PLC
//! - `DeliveryRobotDriver`: MQTT command/status topics correlated by order id
//!
//! The wire codecs (`modbus`, `s7`, `mqtt`) sit behind small link traits so
//! the device logic can be driven by in-process fakes.

pub mod coffee;
pub mod grinder;
pub mod ice_maker;
pub mod modbus;
pub mod mqtt;
pub mod pending;
pub mod poll;
pub mod robot;
pub mod s7;
mod session;

pub use self::coffee::{CoffeeMachineDriver, CoffeeOptions};
pub use self::grinder::{GrinderDriver, GrinderOptions};
pub use self::ice_maker::{IceMakerDriver, IceOptions};
pub use self::modbus::{ModbusTcpLink, RegisterBus, RegisterLink};
pub use self::mqtt::{MqttLink, MqttSettings};
pub use self::pending::PendingRequests;
pub use self::poll::PollBudget;
pub use self::robot::{
    DeliveryCommand, DeliveryRobotDriver, DeliveryStatusReport, DeliveryTimeoutPolicy, RobotLink,
    RobotOptions,
};
pub use self::s7::{BlockBus, BlockLink, S7TcpLink};
