//! Queue and store backends.
//!
//! - `InMemoryQueue` / `InMemoryOrderStore`: single process, demo and tests
//! - `NatsQueue`: JetStream work-queue streams
//! - `PgOrderStore`: PostgreSQL with skip-locked claiming

pub mod inmem_queue;
pub mod inmem_store;
pub mod nats_queue;
pub mod pg_store;

pub use self::inmem_queue::InMemoryQueue;
pub use self::inmem_store::InMemoryOrderStore;
pub use self::nats_queue::{NatsQueue, NatsSettings};
pub use self::pg_store::PgOrderStore;
