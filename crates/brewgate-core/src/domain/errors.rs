//! Errors and their operational classification.
//!
//! - `DriverError`: a device step failed. Its `Display` text is what ends up in
//!   the order's `error_message`, so protocol errors carry the device's own
//!   line verbatim.
//! - `QueueError` / `StoreError`: infrastructure failures. Background loops log
//!   these and keep going.

use std::time::Duration;
use thiserror::Error;

use super::DeviceKind;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to connect to {device} at {addr}: {source}")]
    Connect {
        device: DeviceKind,
        addr: String,
        source: std::io::Error,
    },

    #[error("connecting to {device} at {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        device: DeviceKind,
        addr: String,
        timeout: Duration,
    },

    #[error("{0} is not connected")]
    NotConnected(DeviceKind),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Device-reported error, verbatim (`ERROR:UNKNOWN_COFFEE_TYPE`, ...).
    #[error("{0}")]
    Protocol(String),

    /// Malformed frame or unexpected reply shape.
    #[error("bad response from {device}: {detail}")]
    BadResponse { device: DeviceKind, detail: String },

    #[error("grind_timeout")]
    GrindTimeout,

    #[error("device_timeout:{operation}")]
    DeviceTimeout { operation: &'static str },

    #[error("device_fault:{code}")]
    DeviceFault { code: i32 },

    /// Shortage persisted through every allowed refill; holds the last line.
    #[error("{0}")]
    IngredientShortage(String),

    #[error("delivery for order [{order_id}] failed with status: {status}")]
    DeliveryFailed { order_id: String, status: String },

    #[error("delivery task for order [{order_id}] timed out")]
    DeliveryTimeout { order_id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("payload encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unsupported by {device}: {detail}")]
    Unsupported { device: DeviceKind, detail: String },
}

impl DriverError {
    /// Does this error mean the session is unusable and must be reopened?
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            DriverError::Connect { .. }
                | DriverError::ConnectTimeout { .. }
                | DriverError::NotConnected(_)
                | DriverError::Io(_)
                | DriverError::BadResponse { .. }
                | DriverError::Transport(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("message encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row for order {id}: {detail}")]
    CorruptRow { id: i64, detail: String },
}
