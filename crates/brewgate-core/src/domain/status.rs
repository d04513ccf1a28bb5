use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of a device, read fresh on every query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub idle: bool,
    pub error_code: i32,
    /// Inventory item name -> quantity (`bean`, `MILK`, `ice`, ...).
    pub inventory: BTreeMap<String, i64>,
}

impl DeviceStatus {
    pub fn idle() -> Self {
        Self {
            idle: true,
            ..Self::default()
        }
    }

    pub fn with_item(mut self, name: impl Into<String>, quantity: i64) -> Self {
        self.inventory.insert(name.into(), quantity);
        self
    }
}
