//! Domain model (orders, results, commands, device status, errors).
//!
//! Everything in here is plain data: no I/O, no locks. Drivers, queues and
//! stores translate to and from these types at their edges.

pub mod command;
pub mod errors;
pub mod ids;
pub mod order;
pub mod result;
pub mod status;

pub use self::command::{CommandReply, DeliveryRequest, DeviceKind, UnifiedCommand};
pub use self::errors::{DriverError, QueueError, StoreError};
pub use self::ids::{CorrelationId, OrderId};
pub use self::order::{CoffeeType, NewOrder, Order, OrderStatus};
pub use self::result::OrderResult;
pub use self::status::DeviceStatus;
