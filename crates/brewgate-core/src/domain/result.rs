//! Outcome of processing one order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OrderId, OrderStatus};

/// One result per order that reached `queued`.
///
/// `error_message` is empty on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub success: bool,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: String,
}

impl OrderResult {
    pub fn succeeded(order_id: OrderId, finished_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            success: true,
            finished_at,
            error_message: String::new(),
        }
    }

    pub fn failed(
        order_id: OrderId,
        finished_at: DateTime<Utc>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            success: false,
            finished_at,
            error_message: error_message.into(),
        }
    }

    /// Terminal status this result moves its order into.
    pub fn terminal_status(&self) -> OrderStatus {
        if self.success {
            OrderStatus::Done
        } else {
            OrderStatus::Error
        }
    }
}
