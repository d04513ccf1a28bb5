//! Order model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::OrderId;

/// Order lifecycle.
///
/// State transitions:
/// - Pending -> Queued (claim, poller via store)
/// - Queued -> Done | Error (syncer applying a result)
///
/// Nothing else is legal, and nothing ever moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Queued,
    Done,
    Error,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Queued => "queued",
            OrderStatus::Done => "done",
            OrderStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Error)
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Queued)
                | (OrderStatus::Queued, OrderStatus::Done)
                | (OrderStatus::Queued, OrderStatus::Error)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "queued" => Ok(OrderStatus::Queued),
            "done" => Ok(OrderStatus::Done),
            "error" => Ok(OrderStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Drink name as the coffee machine spells it (`LATTE`, `FLAT WHITE`, ...).
///
/// Normalised to upper case on construction so `latte` and `LATTE` address the
/// same recipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CoffeeType(String);

impl CoffeeType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CoffeeType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for CoffeeType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<CoffeeType> for String {
    fn from(c: CoffeeType) -> Self {
        c.0
    }
}

impl fmt::Display for CoffeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An order as the store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub coffee_type: CoffeeType,
    pub need_ice: bool,
    pub table_number: i32,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: String,
}

/// Order fields supplied by whoever places the order; the store fills in the
/// rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub coffee_type: CoffeeType,
    pub need_ice: bool,
    pub table_number: i32,
}

impl NewOrder {
    pub fn new(coffee_type: impl Into<CoffeeType>, need_ice: bool, table_number: i32) -> Self {
        Self {
            coffee_type: coffee_type.into(),
            need_ice,
            table_number,
        }
    }
}
