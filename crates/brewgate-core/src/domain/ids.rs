//! Identifiers.
//!
//! - `OrderId` is assigned by the store and never changes afterwards.
//! - `CorrelationId` is a ULID minted for robot deliveries that are not tied
//!   to a stored order (e.g. a direct `deliver` command).

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Store-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for OrderId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Correlation id for an out-of-band delivery request.
///
/// ULIDs sort by creation time, which keeps robot logs readable when several
/// direct deliveries are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Ulid);

impl CorrelationId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for CorrelationId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dlv-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_displays_as_plain_number() {
        assert_eq!(OrderId::new(42).to_string(), "42");
        assert_eq!(serde_json::to_string(&OrderId::new(7)).unwrap(), "7");
    }

    #[test]
    fn correlation_ids_are_prefixed_and_sortable() {
        let first = CorrelationId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = CorrelationId::from_ulid(Ulid::new());

        assert!(first.to_string().starts_with("dlv-"));
        assert!(first < second);
    }
}
