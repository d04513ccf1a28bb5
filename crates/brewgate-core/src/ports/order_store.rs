//! OrderStore port - the source of truth for order records.

use async_trait::async_trait;

use crate::domain::{NewOrder, Order, OrderId, OrderResult, StoreError};

/// Owns orders for their whole lifetime.
///
/// # Invariants
/// - `poll_pending` claims: every returned order is already `queued`, and no
///   concurrent caller can get the same order.
/// - `update_result` only moves `queued` orders; re-applying a result to a
///   terminal order changes nothing and returns `false`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Claim up to `limit` pending orders, oldest first.
    async fn poll_pending(&self, limit: usize) -> Result<Vec<Order>, StoreError>;

    /// `pending -> queued` for the given ids; ids in any other state are left
    /// alone.
    async fn mark_queued(&self, ids: &[OrderId]) -> Result<(), StoreError>;

    /// Apply a result. Returns whether the order changed.
    async fn update_result(&self, result: &OrderResult) -> Result<bool, StoreError>;

    /// Insert pending orders, returning the assigned ids in input order.
    async fn seed(&self, orders: Vec<NewOrder>) -> Result<Vec<OrderId>, StoreError>;

    /// Every order, by id.
    async fn all(&self) -> Result<Vec<Order>, StoreError>;
}
