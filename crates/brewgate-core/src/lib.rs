//! brewgate-core
//!
//! Gateway between an order database and four cafe machines: a Modbus
//! grinder, a line-protocol coffee machine, an S7 ice maker and an MQTT
//! delivery robot.
//!
//! # Modules
//! - **domain**: orders, results, device status, uniform commands, errors
//! - **ports**: `Device`, `OrderQueue`, `OrderStore`, `Clock`, `IdGenerator`
//! - **drivers**: one protocol driver per machine
//! - **impls**: in-memory, NATS and PostgreSQL backends
//! - **app**: pipeline, poller, syncer, command dispatcher, builder
//! - **config** / **telemetry**: environment configuration and tracing setup

pub mod app;
pub mod config;
pub mod domain;
pub mod drivers;
pub mod impls;
pub mod ports;
pub mod telemetry;
