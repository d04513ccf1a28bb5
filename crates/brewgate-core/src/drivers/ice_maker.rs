//! Ice maker driver (S7 data block 1).
//!
//! Layout, 16-bit big-endian at byte offsets:
//! - 0 stock
//! - 2 status (0 idle, 1 producing, 2 dispensing, 3 fault)
//! - 4 command (1 produce, 3 dispense)
//! - 6 amount to dispense

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::poll::PollBudget;
use super::s7::{BlockBus, BlockLink, S7TcpLink};
use super::session::{Session, ensure_open, release_on_failure};
use crate::domain::{DeviceKind, DeviceStatus, DriverError};
use crate::ports::{Ack, Device, IceCommand};

const DB: u16 = 1;
const OFF_STOCK: u32 = 0;
const OFF_STATUS: u32 = 2;
const OFF_COMMAND: u32 = 4;
const OFF_AMOUNT: u32 = 6;

const CMD_PRODUCE: i16 = 1;
const CMD_DISPENSE: i16 = 3;

const STATUS_IDLE: i16 = 0;
const STATUS_FAULT: i16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IceOptions {
    pub produce: PollBudget,
    pub dispense: PollBudget,
}

impl Default for IceOptions {
    fn default() -> Self {
        Self {
            produce: PollBudget::from_millis(500, 240),
            dispense: PollBudget::from_millis(200, 150),
        }
    }
}

pub struct IceMakerDriver {
    link: Arc<dyn BlockLink>,
    session: Session<Box<dyn BlockBus>>,
    options: IceOptions,
}

impl IceMakerDriver {
    pub fn new(link: Arc<dyn BlockLink>, options: IceOptions) -> Self {
        Self {
            link,
            session: Session::new(),
            options,
        }
    }

    pub fn s7(addr: impl Into<String>, rack: u8, slot: u8, options: IceOptions) -> Self {
        Self::new(Arc::new(S7TcpLink::new(addr, rack, slot)), options)
    }
}

#[async_trait]
impl Device for IceMakerDriver {
    type Command = IceCommand;

    fn kind(&self) -> DeviceKind {
        DeviceKind::IceMaker
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
        let result = read_stock_and_status(&mut **bus).await;
        release_on_failure(&mut *slot, &result);

        let (stock, status) = result?;
        Ok(DeviceStatus {
            idle: status == STATUS_IDLE,
            error_code: if status == STATUS_FAULT { i32::from(status) } else { 0 },
            ..DeviceStatus::default()
        }
        .with_item("ice", i64::from(stock)))
    }

    #[instrument(name = "ice_maker", skip(self))]
    async fn execute(&self, command: IceCommand) -> Result<Ack, DriverError> {
        let mut slot = self.session.lock().await;
        let bus = ensure_open(&mut *slot, || self.link.open()).await?;
        let result = match command {
            IceCommand::ProduceUntil { min_stock } => {
                produce_until(&mut **bus, min_stock, &self.options.produce).await
            }
            IceCommand::Dispense { amount } => {
                dispense(&mut **bus, amount, &self.options.dispense).await
            }
        };
        release_on_failure(&mut *slot, &result);
        result.map(|()| Ack::Completed)
    }
}

async fn read_stock_and_status(bus: &mut dyn BlockBus) -> Result<(i16, i16), DriverError> {
    let stock = bus.read_i16(DB, OFF_STOCK).await?;
    let status = bus.read_i16(DB, OFF_STATUS).await?;
    Ok((stock, status))
}

/// No-op when stock already covers `min_stock`.
async fn produce_until(
    bus: &mut dyn BlockBus,
    min_stock: i16,
    budget: &PollBudget,
) -> Result<(), DriverError> {
    let stock = bus.read_i16(DB, OFF_STOCK).await?;
    if stock >= min_stock {
        debug!(stock, min_stock, "ice stock sufficient");
        return Ok(());
    }

    info!(stock, min_stock, "producing ice");
    bus.write_i16(DB, OFF_COMMAND, CMD_PRODUCE).await?;
    for _ in 0..budget.max_attempts {
        budget.wait().await;
        let (stock, status) = read_stock_and_status(bus).await?;
        if status == STATUS_FAULT {
            return Err(DriverError::DeviceFault {
                code: i32::from(status),
            });
        }
        if stock >= min_stock {
            return Ok(());
        }
    }
    Err(DriverError::DeviceTimeout {
        operation: "ice_produce",
    })
}

async fn dispense(bus: &mut dyn BlockBus, amount: i16, budget: &PollBudget) -> Result<(), DriverError> {
    bus.write_i16(DB, OFF_AMOUNT, amount).await?;
    bus.write_i16(DB, OFF_COMMAND, CMD_DISPENSE).await?;
    for _ in 0..budget.max_attempts {
        budget.wait().await;
        match bus.read_i16(DB, OFF_STATUS).await? {
            STATUS_IDLE => return Ok(()),
            STATUS_FAULT => {
                return Err(DriverError::DeviceFault {
                    code: i32::from(STATUS_FAULT),
                });
            }
            _ => {}
        }
    }
    Err(DriverError::DeviceTimeout {
        operation: "ice_dispense",
    })
}


#[cfg(test)]
mod tests {
    use super::fake::FakeIceMaker;
    use super::*;

    fn driver(fake: &FakeIceMaker) -> IceMakerDriver {
        IceMakerDriver::new(
            Arc::new(fake.clone()),
            IceOptions {
                produce: PollBudget::from_millis(1, 5),
                dispense: PollBudget::from_millis(1, 5),
            },
        )
    }

    #[tokio::test]
    async fn produce_is_a_noop_when_stock_suffices() {
        let fake = FakeIceMaker::with_stock(250);

        driver(&fake)
            .execute(IceCommand::ProduceUntil { min_stock: 200 })
            .await
            .unwrap();

        assert!(fake.0.lock().unwrap().commands.is_empty());
    }

    #[tokio::test]
    async fn produce_runs_until_stock_reaches_minimum() {
        let fake = FakeIceMaker::with_stock(50);

        driver(&fake)
            .execute(IceCommand::ProduceUntil { min_stock: 200 })
            .await
            .unwrap();

        let state = fake.0.lock().unwrap();
        assert_eq!(state.commands, vec![CMD_PRODUCE]);
        assert!(state.stock >= 200);
    }

    #[tokio::test]
    async fn dispense_writes_amount_then_waits_for_idle() {
        let fake = FakeIceMaker::with_stock(300);
        fake.0.lock().unwrap().busy_reads = 2;

        driver(&fake)
            .execute(IceCommand::Dispense { amount: 100 })
            .await
            .unwrap();

        let state = fake.0.lock().unwrap();
        assert_eq!(state.commands, vec![CMD_DISPENSE]);
        assert_eq!(state.dispensed, vec![100]);
        assert_eq!(state.stock, 200);
    }

    #[tokio::test]
    async fn fault_status_fails_fast() {
        let fake = FakeIceMaker::with_stock(300);
        fake.0.lock().unwrap().fault = true;

        let err = driver(&fake)
            .execute(IceCommand::Dispense { amount: 100 })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "device_fault:3");
    }

    #[tokio::test]
    async fn dispense_that_never_settles_times_out() {
        let fake = FakeIceMaker::with_stock(300);
        fake.0.lock().unwrap().busy_reads = 100;

        let err = driver(&fake)
            .execute(IceCommand::Dispense { amount: 100 })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "device_timeout:ice_dispense");
    }

    #[tokio::test]
    async fn status_reports_stock_and_fault() {
        let fake = FakeIceMaker::with_stock(120);

        let status = driver(&fake).query_status().await.unwrap();
        assert!(status.idle);
        assert_eq!(status.error_code, 0);
        assert_eq!(status.inventory.get("ice"), Some(&120));

        fake.0.lock().unwrap().status = STATUS_FAULT;
        let mut faulted = driver(&fake).query_status().await.unwrap();
        assert_eq!(faulted.error_code, 3);
        assert_eq!(faulted.inventory.remove("ice"), Some(120));
    }

    #[tokio::test]
    async fn works_over_the_s7_wire() {
        let memory = Arc::new(std::sync::Mutex::new(vec![0u8; 8]));
        memory.lock().unwrap()[0..2].copy_from_slice(&250i16.to_be_bytes());
        let addr = crate::drivers::s7::server::spawn(memory).await;

        let ice = IceMakerDriver::s7(addr, 0, 2, IceOptions::default());
        ice.execute(IceCommand::ProduceUntil { min_stock: 200 })
            .await
            .unwrap();
        let status = ice.query_status().await.unwrap();
        assert_eq!(status.inventory.get("ice"), Some(&250));
    }
}
