//! InMemoryOrderStore - mutex-guarded order table.
//!
//! Ids are assigned in insertion order, so scanning the table front to back
//! is also oldest-first.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{NewOrder, Order, OrderId, OrderResult, OrderStatus, StoreError};
use crate::ports::{Clock, OrderStore};

struct Table {
    next_id: i64,
    orders: Vec<Order>,
}

pub struct InMemoryOrderStore {
    clock: Arc<dyn Clock>,
    table: Mutex<Table>,
}

impl InMemoryOrderStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            table: Mutex::new(Table {
                next_id: 1,
                orders: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn poll_pending(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let mut table = self.table.lock().await;
        let claimed = table
            .orders
            .iter_mut()
            .filter(|order| order.status == OrderStatus::Pending)
            .take(limit)
            .map(|order| {
                order.status = OrderStatus::Queued;
                order.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_queued(&self, ids: &[OrderId]) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        for order in table.orders.iter_mut() {
            if ids.contains(&order.id) && order.status == OrderStatus::Pending {
                order.status = OrderStatus::Queued;
            }
        }
        Ok(())
    }

    async fn update_result(&self, result: &OrderResult) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;
        let next = result.terminal_status();
        let Some(order) = table
            .orders
            .iter_mut()
            .find(|order| order.id == result.order_id)
        else {
            return Ok(false);
        };
        if !order.status.can_advance_to(next) {
            return Ok(false);
        }
        order.status = next;
        order.finished_at = Some(result.finished_at);
        order.error_message = result.error_message.clone();
        Ok(true)
    }

    async fn seed(&self, orders: Vec<NewOrder>) -> Result<Vec<OrderId>, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let mut ids = Vec::with_capacity(orders.len());
        for new in orders {
            let id = OrderId::new(table.next_id);
            table.next_id += 1;
            table.orders.push(Order {
                id,
                coffee_type: new.coffee_type,
                need_ice: new.need_ice,
                table_number: new.table_number,
                created_at: now,
                status: OrderStatus::Pending,
                finished_at: None,
                error_message: String::new(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn all(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.table.lock().await.orders.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn store() -> InMemoryOrderStore {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        InMemoryOrderStore::new(Arc::new(FixedClock::new(at)))
    }

    fn latte(table: i32) -> NewOrder {
        NewOrder::new("LATTE", true, table)
    }

    #[tokio::test]
    async fn seed_assigns_increasing_ids() {
        let store = store();
        let ids = store.seed(vec![latte(1), latte(2)]).await.unwrap();
        assert_eq!(ids, vec![OrderId::new(1), OrderId::new(2)]);
        assert!(store.all().await.unwrap().iter().all(|o| o.status == OrderStatus::Pending));
    }

    #[tokio::test]
    async fn poll_claims_each_order_once() {
        let store = store();
        store.seed((1..=5).map(latte).collect()).await.unwrap();

        let first = store.poll_pending(3).await.unwrap();
        let second = store.poll_pending(3).await.unwrap();
        let third = store.poll_pending(3).await.unwrap();

        let ids: Vec<i64> = first.iter().chain(&second).map(|o| o.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(first.iter().all(|o| o.status == OrderStatus::Queued));
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn concurrent_pollers_never_share_an_order() {
        let store = Arc::new(store());
        store.seed((1..=40).map(latte).collect()).await.unwrap();

        let pollers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut mine = Vec::new();
                    loop {
                        let batch = store.poll_pending(3).await.unwrap();
                        if batch.is_empty() {
                            return mine;
                        }
                        mine.extend(batch.into_iter().map(|o| o.id.get()));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut claimed = Vec::new();
        for poller in pollers {
            claimed.extend(poller.await.unwrap());
        }
        claimed.sort_unstable();
        assert_eq!(claimed, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn results_only_apply_to_queued_orders() {
        let store = store();
        let ids = store.seed(vec![latte(1), latte(2)]).await.unwrap();
        store.mark_queued(&ids[..1]).await.unwrap();
        let at = Utc::now();

        // pending order: not claimed yet
        assert!(!store.update_result(&OrderResult::succeeded(ids[1], at)).await.unwrap());

        let failed = OrderResult::failed(ids[0], at, "grind_timeout");
        assert!(store.update_result(&failed).await.unwrap());
        // replay and contradicting result are both no-ops
        assert!(!store.update_result(&failed).await.unwrap());
        assert!(!store.update_result(&OrderResult::succeeded(ids[0], at)).await.unwrap());

        let all = store.all().await.unwrap();
        assert_eq!(all[0].status, OrderStatus::Error);
        assert_eq!(all[0].error_message, "grind_timeout");
        assert_eq!(all[0].finished_at, Some(at));
        assert_eq!(all[1].status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_order_results_are_ignored() {
        let store = store();
        let applied = store
            .update_result(&OrderResult::succeeded(OrderId::new(99), Utc::now()))
            .await
            .unwrap();
        assert!(!applied);
    }
}
