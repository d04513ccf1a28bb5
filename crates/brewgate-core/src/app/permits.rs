//! Device permits.
//!
//! Four binary permits, one per device class. Waiters are not granted in
//! arrival order.

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

use crate::domain::DeviceKind;

#[derive(Debug, Default)]
pub struct DevicePermits {
    grinder: Mutex<()>,
    brewer: Mutex<()>,
    ice_maker: Mutex<()>,
    robot: Mutex<()>,
}

impl DevicePermits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `kind`; released when the guard drops.
    pub async fn acquire(&self, kind: DeviceKind) -> MutexGuard<'_, ()> {
        let permit = match kind {
            DeviceKind::Grinder => &self.grinder,
            DeviceKind::CoffeeMachine => &self.brewer,
            DeviceKind::IceMaker => &self.ice_maker,
            DeviceKind::DeliveryRobot => &self.robot,
        };
        if let Ok(guard) = permit.try_lock() {
            return guard;
        }
        trace!(device = %kind, "waiting for device permit");
        permit.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn a_held_permit_blocks_the_same_device_only() {
        let permits = DevicePermits::new();
        let _grinder = permits.acquire(DeviceKind::Grinder).await;

        let same = tokio::time::timeout(
            Duration::from_millis(20),
            permits.acquire(DeviceKind::Grinder),
        )
        .await;
        assert!(same.is_err());

        let other = tokio::time::timeout(
            Duration::from_millis(20),
            permits.acquire(DeviceKind::IceMaker),
        )
        .await;
        assert!(other.is_ok());
    }
}
