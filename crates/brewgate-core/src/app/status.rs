//! Order counts by lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Order, OrderStatus, StoreError};
use crate::ports::OrderStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub queued: usize,
    pub done: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_orders(orders: &[Order]) -> Self {
        orders.iter().fold(Self::default(), |mut counts, order| {
            match order.status {
                OrderStatus::Pending => counts.pending += 1,
                OrderStatus::Queued => counts.queued += 1,
                OrderStatus::Done => counts.done += 1,
                OrderStatus::Error => counts.error += 1,
            }
            counts
        })
    }

    pub async fn snapshot(store: &dyn OrderStore) -> Result<Self, StoreError> {
        Ok(Self::from_orders(&store.all().await?))
    }

    pub fn total(&self) -> usize {
        self.pending + self.queued + self.done + self.error
    }

    /// Every order reached `done` or `error`.
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.queued == 0
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} queued={} done={} error={}",
            self.pending, self.queued, self.done, self.error
        )
    }
}

/// Log a snapshot every `every` until `shutdown`.
pub(crate) fn spawn_reporter(
    store: Arc<dyn OrderStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match StatusCounts::snapshot(store.as_ref()).await {
                Ok(counts) => info!(
                    pending = counts.pending,
                    queued = counts.queued,
                    done = counts.done,
                    error = counts.error,
                    "order status"
                ),
                Err(err) => warn!(error = %err, "order status snapshot failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoffeeType, OrderId};
    use chrono::Utc;

    fn with_status(id: i64, status: OrderStatus) -> Order {
        Order {
            id: OrderId::new(id),
            coffee_type: CoffeeType::new("AMERICANO"),
            need_ice: false,
            table_number: 1,
            created_at: Utc::now(),
            status,
            finished_at: None,
            error_message: String::new(),
        }
    }

    #[test]
    fn counts_each_state() {
        let orders = vec![
            with_status(1, OrderStatus::Done),
            with_status(2, OrderStatus::Done),
            with_status(3, OrderStatus::Error),
            with_status(4, OrderStatus::Queued),
        ];

        let counts = StatusCounts::from_orders(&orders);

        assert_eq!(counts.done, 2);
        assert_eq!(counts.total(), 4);
        assert!(!counts.all_terminal());
        assert_eq!(counts.to_string(), "pending=0 queued=1 done=2 error=1");
    }
}
