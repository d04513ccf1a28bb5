//! Application layer: the order pipeline and everything wired around it.
//!
//! - **pipeline**: per-order workflow (grind -> brew -> ice -> deliver)
//! - **permits**: one exclusive permit per device class
//! - **poller** / **syncer**: store -> queue and queue -> store loops
//! - **dispatch**: single uniform command against one device
//! - **builder** / **handle**: fail-fast wiring, start and shutdown
//! - **status**: order counts by lifecycle state

pub mod builder;
pub mod dispatch;
pub mod handle;
pub mod permits;
pub mod pipeline;
pub mod poller;
pub mod status;
pub mod syncer;

pub use self::builder::{BuildError, Gateway, PipelineBuilder, PipelineSettings};
pub use self::pipeline::{IcePlan, OrderPipeline};
pub use self::dispatch::CommandDispatcher;
pub use self::handle::GatewayHandle;
pub use self::permits::DevicePermits;
pub use self::poller::OrderPoller;
pub use self::status::StatusCounts;
pub use self::syncer::ResultSyncer;
