//! PgOrderStore - PostgreSQL order table.
//!
//! Claiming runs in one transaction: a `FOR UPDATE SKIP LOCKED` read picks
//! the batch, rows locked by a concurrent poller are skipped instead of
//! waited on, and the batch is flipped to `queued` before commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use crate::domain::{CoffeeType, NewOrder, Order, OrderId, OrderResult, OrderStatus, StoreError};
use crate::ports::OrderStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id          BIGSERIAL PRIMARY KEY,
    coffee_type TEXT        NOT NULL,
    bool_ice    BOOLEAN     NOT NULL DEFAULT FALSE,
    table_num   INTEGER     NOT NULL,
    status      TEXT        NOT NULL DEFAULT 'pending',
    create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    finish_time TIMESTAMPTZ,
    error_msg   TEXT
)
"#;

const COLUMNS: &str =
    "id, coffee_type, bool_ice, table_num, status, create_time, finish_time, error_msg";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    coffee_type: String,
    bool_ice: bool,
    table_num: i32,
    status: String,
    create_time: DateTime<Utc>,
    finish_time: Option<DateTime<Utc>>,
    error_msg: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::CorruptRow {
                id: row.id,
                detail: e.to_string(),
            })?;
        Ok(Order {
            id: OrderId::new(row.id),
            coffee_type: CoffeeType::new(row.coffee_type),
            need_ice: row.bool_ice,
            table_number: row.table_num,
            created_at: row.create_time,
            status,
            finished_at: row.finish_time,
            error_message: row.error_msg.unwrap_or_default(),
        })
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the `orders` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn raw_ids(ids: &[OrderId]) -> Vec<i64> {
    ids.iter().map(|id| id.get()).collect()
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn poll_pending(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM orders
             WHERE status = 'pending'
             ORDER BY id
             LIMIT $1
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        sqlx::query("UPDATE orders SET status = 'queued' WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(claimed = ids.len(), "claimed pending orders");

        rows.into_iter()
            .map(|row| {
                let mut order = Order::try_from(row)?;
                order.status = OrderStatus::Queued;
                Ok(order)
            })
            .collect()
    }

    async fn mark_queued(&self, ids: &[OrderId]) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = 'queued' WHERE id = ANY($1) AND status = 'pending'")
            .bind(raw_ids(ids))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_result(&self, result: &OrderResult) -> Result<bool, StoreError> {
        let outcome = sqlx::query(
            "UPDATE orders
             SET status = $2, finish_time = $3, error_msg = $4
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(result.order_id.get())
        .bind(result.terminal_status().as_str())
        .bind(result.finished_at)
        .bind(&result.error_message)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn seed(&self, orders: Vec<NewOrder>) -> Result<Vec<OrderId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(orders.len());
        for order in orders {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO orders (coffee_type, bool_ice, table_num, status)
                 VALUES ($1, $2, $3, 'pending')
                 RETURNING id",
            )
            .bind(order.coffee_type.as_str())
            .bind(order.need_ice)
            .bind(order.table_number)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(OrderId::new(id));
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn all(&self) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM orders ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Order::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> OrderRow {
        OrderRow {
            id: 4,
            coffee_type: "latte".into(),
            bool_ice: true,
            table_num: 8,
            status: status.into(),
            create_time: Utc::now(),
            finish_time: None,
            error_msg: None,
        }
    }

    #[test]
    fn rows_convert_to_orders() {
        let order = Order::try_from(row("queued")).unwrap();
        assert_eq!(order.id, OrderId::new(4));
        assert_eq!(order.coffee_type.as_str(), "LATTE");
        assert_eq!(order.status, OrderStatus::Queued);
        assert_eq!(order.error_message, "");
    }

    #[test]
    fn unknown_status_is_a_corrupt_row() {
        let err = Order::try_from(row("cancelled")).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { id: 4, .. }));
    }
}
