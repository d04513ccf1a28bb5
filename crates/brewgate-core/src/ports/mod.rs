//! Ports - the seams between the pipeline and the outside world.
//!
//! Each trait hides one external collaborator:
//! - `Device`: a physical machine behind its wire protocol
//! - `OrderQueue`: transport for orders and results (in-process or broker)
//! - `OrderStore`: source of truth for order records (in-memory or SQL)
//! - `Clock` / `IdGenerator`: time and ids, swappable in tests

pub mod clock;
pub mod device;
pub mod id_generator;
pub mod order_queue;
pub mod order_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::device::{
    Ack, BrewerCommand, Device, DeviceSet, DynBrewer, DynGrinder, DynIceMaker, DynRobot,
    GrinderCommand, IceCommand, RobotCommand,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::order_queue::OrderQueue;
pub use self::order_store::OrderStore;
