//! Grinder driver (Modbus holding registers).
//!
//! Register map:
//! - 0 command (1 grind, 2 refill)
//! - 1 status (0 idle, 1 grinding, 2 refilling)
//! - 2 bean level
//! - 3 error code

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::modbus::{ModbusTcpLink, RegisterBus, RegisterLink};
use super::poll::PollBudget;
use super::session::{Session, ensure_open, release_on_failure};
use crate::domain::{DeviceKind, DeviceStatus, DriverError};
use crate::ports::{Ack, Device, GrinderCommand};

const REG_COMMAND: u16 = 0;
const REG_STATUS: u16 = 1;
const REG_BEAN_LEVEL: u16 = 2;

const CMD_GRIND: u16 = 1;
const CMD_REFILL: u16 = 2;

const STATUS_IDLE: u16 = 0;
const STATUS_REFILLING: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrinderOptions {
    pub grind: PollBudget,
    pub restock: PollBudget,
    /// Bean levels below this trigger a refill before grinding.
    pub low_bean_threshold: u16,
}

impl Default for GrinderOptions {
    fn default() -> Self {
        Self {
            grind: PollBudget::from_millis(200, 50),
            restock: PollBudget::from_millis(200, 300),
            low_bean_threshold: 10,
        }
    }
}

pub struct GrinderDriver {
    link: Arc<dyn RegisterLink>,
    session: Session<Box<dyn RegisterBus>>,
    options: GrinderOptions,
}

impl GrinderDriver {
    pub fn new(link: Arc<dyn RegisterLink>, options: GrinderOptions) -> Self {
        Self {
            link,
            session: Session::new(),
            options,
        }
    }

    pub fn modbus(addr: impl Into<String>, unit_id: u8, options: GrinderOptions) -> Self {
        Self::new(Arc::new(ModbusTcpLink::new(addr, unit_id)), options)
    }
}

#[async_trait]
impl Device for GrinderDriver {
    type Command = GrinderCommand;

    fn kind(&self) -> DeviceKind {
        DeviceKind::Grinder
    }

    async fn connect(&self) -> Result<(), DriverError> {
        let mut slot = self.session.lock().await;
        ensure_open(&mut *slot, || self.link.open()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.session.close().await;
        Ok(())
    }

    async fn query_status(&self) -> Result<DeviceStatus, DriverError> {
        let mut slot = self.session.lock().await;
        let bus = ensure_open(&mut *slot, || self.link.open()).await?;
        let result = bus.read_registers(REG_STATUS, 3).await;
        release_on_failure(&mut *slot, &result);

        let values = result?;
        let &[status, beans, error_code] = values.as_slice() else {
            return Err(DriverError::BadResponse {
                device: DeviceKind::Grinder,
                detail: format!("expected 3 registers, got {}", values.len()),
            });
        };
        Ok(DeviceStatus {
            idle: status == STATUS_IDLE,
            error_code: i32::from(error_code),
            ..DeviceStatus::default()
        }
        .with_item("bean", i64::from(beans)))
    }

    #[instrument(name = "grinder", skip(self))]
    async fn execute(&self, command: GrinderCommand) -> Result<Ack, DriverError> {
        let mut slot = self.session.lock().await;
        let bus = ensure_open(&mut *slot, || self.link.open()).await?;
        let result = match command {
            GrinderCommand::GrindAuto => grind_auto(&mut **bus, &self.options).await,
            GrinderCommand::Restock => restock(&mut **bus, &self.options).await,
        };
        release_on_failure(&mut *slot, &result);
        result.map(|()| Ack::Completed)
    }
}

/// Refill if the hopper is low or mid-refill, then grind and wait for idle.
async fn grind_auto(bus: &mut dyn RegisterBus, options: &GrinderOptions) -> Result<(), DriverError> {
    let status = bus.read_register(REG_STATUS).await?;
    let beans = bus.read_register(REG_BEAN_LEVEL).await?;
    if status == STATUS_REFILLING || beans < options.low_bean_threshold {
        info!(status, beans, "bean level low, restocking before grind");
        restock(bus, options).await?;
    }

    bus.write_register(REG_COMMAND, CMD_GRIND).await?;
    for attempt in 1..=options.grind.max_attempts {
        options.grind.wait().await;
        if bus.read_register(REG_STATUS).await? == STATUS_IDLE {
            debug!(attempt, "grind finished");
            return Ok(());
        }
    }
    Err(DriverError::GrindTimeout)
}

async fn restock(bus: &mut dyn RegisterBus, options: &GrinderOptions) -> Result<(), DriverError> {
    bus.write_register(REG_COMMAND, CMD_REFILL).await?;
    for _ in 0..options.restock.max_attempts {
        options.restock.wait().await;
        if bus.read_register(REG_STATUS).await? == STATUS_IDLE {
            return Ok(());
        }
    }
    Err(DriverError::DeviceTimeout {
        operation: "grinder_restock",
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Simulated grinder. A command keeps the status busy for
    /// `busy_reads` status reads, or forever when `stuck`.
    #[derive(Debug, Default)]
    pub struct GrinderState {
        pub registers: [u16; 4],
        pub writes: Vec<(u16, u16)>,
        pub busy_reads: u32,
        pub stuck: bool,
        pub opens: u32,
        pub remaining_busy: u32,
    }

    #[derive(Clone, Default)]
    pub struct FakeGrinder(pub Arc<Mutex<GrinderState>>);

    impl FakeGrinder {
        pub fn with_beans(beans: u16) -> Self {
            let fake = Self::default();
            fake.0.lock().unwrap().registers[REG_BEAN_LEVEL as usize] = beans;
            fake
        }

        pub fn commands(&self) -> Vec<u16> {
            let state = self.0.lock().unwrap();
            state
                .writes
                .iter()
                .filter(|(addr, _)| *addr == REG_COMMAND)
                .map(|(_, value)| *value)
                .collect()
        }
    }

    #[async_trait]
    impl RegisterBus for FakeGrinder {
        async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DriverError> {
            let mut state = self.0.lock().unwrap();
            if address <= REG_STATUS && REG_STATUS < address + count {
                if state.stuck {
                    state.registers[REG_STATUS as usize] = 1;
                } else if state.remaining_busy > 0 {
                    state.remaining_busy -= 1;
                } else {
                    state.registers[REG_STATUS as usize] = STATUS_IDLE;
                }
            }
            let start = address as usize;
            Ok(state.registers[start..start + count as usize].to_vec())
        }

        async fn write_register(&mut self, address: u16, value: u16) -> Result<(), DriverError> {
            let mut state = self.0.lock().unwrap();
            state.writes.push((address, value));
            if address == REG_COMMAND {
                state.registers[REG_STATUS as usize] = value;
                state.remaining_busy = state.busy_reads;
                if value == CMD_REFILL {
                    state.registers[REG_BEAN_LEVEL as usize] = 100;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RegisterLink for FakeGrinder {
        async fn open(&self) -> Result<Box<dyn RegisterBus>, DriverError> {
            self.0.lock().unwrap().opens += 1;
            Ok(Box::new(self.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeGrinder;
    use super::*;

    fn fast() -> GrinderOptions {
        GrinderOptions {
            grind: PollBudget::from_millis(1, 5),
            restock: PollBudget::from_millis(1, 5),
            low_bean_threshold: 10,
        }
    }

    fn driver(fake: &FakeGrinder) -> GrinderDriver {
        GrinderDriver::new(Arc::new(fake.clone()), fast())
    }

    #[tokio::test]
    async fn low_beans_restock_before_grinding() {
        let fake = FakeGrinder::with_beans(5);
        fake.0.lock().unwrap().busy_reads = 2;

        let ack = driver(&fake).execute(GrinderCommand::GrindAuto).await.unwrap();

        assert_eq!(ack, Ack::Completed);
        assert_eq!(fake.commands(), vec![CMD_REFILL, CMD_GRIND]);
    }

    #[tokio::test]
    async fn enough_beans_grind_directly() {
        let fake = FakeGrinder::with_beans(50);

        driver(&fake).execute(GrinderCommand::GrindAuto).await.unwrap();

        assert_eq!(fake.commands(), vec![CMD_GRIND]);
    }

    #[tokio::test]
    async fn refilling_status_waits_for_refill_first() {
        let fake = FakeGrinder::with_beans(50);
        fake.0.lock().unwrap().registers[REG_STATUS as usize] = STATUS_REFILLING;
        fake.0.lock().unwrap().remaining_busy = 1;

        driver(&fake).execute(GrinderCommand::GrindAuto).await.unwrap();

        assert_eq!(fake.commands(), vec![CMD_REFILL, CMD_GRIND]);
    }

    #[tokio::test]
    async fn stuck_grinder_times_out() {
        let fake = FakeGrinder::with_beans(50);
        fake.0.lock().unwrap().stuck = true;

        let err = driver(&fake)
            .execute(GrinderCommand::GrindAuto)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "grind_timeout");
    }

    #[tokio::test]
    async fn stuck_restock_is_bounded() {
        let fake = FakeGrinder::with_beans(50);
        fake.0.lock().unwrap().stuck = true;

        let err = driver(&fake)
            .execute(GrinderCommand::Restock)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "device_timeout:grinder_restock");
    }

    #[tokio::test]
    async fn status_reports_beans_and_error_code() {
        let fake = FakeGrinder::with_beans(42);
        fake.0.lock().unwrap().registers[3] = 7;

        let status = driver(&fake).query_status().await.unwrap();

        assert!(status.idle);
        assert_eq!(status.error_code, 7);
        assert_eq!(status.inventory.get("bean"), Some(&42));
    }

    #[tokio::test]
    async fn session_is_opened_once_and_reused() {
        let fake = FakeGrinder::with_beans(50);
        let grinder = driver(&fake);

        grinder.connect().await.unwrap();
        grinder.execute(GrinderCommand::GrindAuto).await.unwrap();
        grinder.query_status().await.unwrap();

        assert_eq!(fake.0.lock().unwrap().opens, 1);
    }
}
