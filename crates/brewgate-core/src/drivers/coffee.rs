//! Coffee machine driver (newline-terminated text over TCP).
//!
//! Requests: `MAKE:<TYPE>`, `REFILL:ALL`, `STATUS:INGREDIENTS`.
//! Replies: `ACK:MAKE` (progress while brewing), `DONE:*`, `ERROR:*`,
//! `ACK:REFILL_SUCCESS:ALL`, `STATUS:INGREDIENTS:K=V,...`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, instrument, warn};

use super::session::{Session, dial, ensure_open, release_on_failure, within};
use crate::domain::{CoffeeType, DeviceKind, DeviceStatus, DriverError};
use crate::ports::{Ack, BrewerCommand, Device};

const SHORTAGE_PREFIX: &str = "ERROR:INSUFFICIENT_INGREDIENT";
const STATUS_PREFIXES: [&str; 2] = ["STATUS:INGREDIENTS:", "ACK:STATUS:INVENTORY:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffeeOptions {
    pub connect_timeout: Duration,
    /// Longest wait for any single reply line. Brewing happens inside it.
    pub read_timeout: Duration,
    /// Pause between a refill and the resent `MAKE`.
    pub refill_pause: Duration,
    /// Refill-and-resend cycles allowed per `MAKE` before giving up.
    pub max_refills: u32,
}

impl Default for CoffeeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(15),
            refill_pause: Duration::from_millis(500),
            max_refills: 3,
        }
    }
}

struct LineSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    read_timeout: Duration,
}

impl LineSession {
    async fn send(&mut self, line: &str) -> Result<(), DriverError> {
        debug!(line, "coffee machine <-");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, DriverError> {
        let reader = &mut self.reader;
        let line = within(self.read_timeout, async move {
            let mut buf = String::new();
            if reader.read_line(&mut buf).await? == 0 {
                return Err(DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "coffee machine closed the connection",
                )));
            }
            Ok(buf)
        })
        .await?;
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        debug!(line = %line, "coffee machine ->");
        Ok(line)
    }

    /// Next line that is not a brewing progress `ACK:`. Only valid while a
    /// `MAKE` is outstanding; other requests answer with `ACK:` on success.
    async fn recv_brew_reply(&mut self) -> Result<String, DriverError> {
        loop {
            let line = self.recv().await?;
            if !line.starts_with("ACK:") {
                return Ok(line);
            }
        }
    }
}

pub struct CoffeeMachineDriver {
    addr: String,
    options: CoffeeOptions,
    session: Session<LineSession>,
}

impl CoffeeMachineDriver {
    pub fn new(addr: impl Into<String>, options: CoffeeOptions) -> Self {
        Self {
            addr: addr.into(),
            options,
            session: Session::new(),
        }
    }

    async fn open(&self) -> Result<LineSession, DriverError> {
        let stream = dial(
            DeviceKind::CoffeeMachine,
            &self.addr,
            self.options.connect_timeout,
        )
        .await?;
        let (read, write) = stream.into_split();
        Ok(LineSession {
            reader: BufReader::new(read),
            writer: write,
            read_timeout: self.options.read_timeout,
        })
    }
}

#[async_trait]
impl Device for CoffeeMachineDriver {
    type Command = BrewerCommand;

    fn kind(&self) -> DeviceKind {
        DeviceKind::CoffeeMachine
    }

    async fn connect(&self) -> Result<(), DriverError> {
        let mut slot = self.session.lock().await;
        ensure_open(&mut *slot, || self.open()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        if let Some(mut session) = self.session.close().await {
            session.writer.shutdown().await?;
        }
        Ok(())
    }

    /// Idleness is not observable over this protocol; always reported idle.
    async fn query_status(&self) -> Result<DeviceStatus, DriverError> {
        let mut slot = self.session.lock().await;
        let session = ensure_open(&mut *slot, || self.open()).await?;
        let result = ingredients(session).await;
        release_on_failure(&mut *slot, &result);
        result
    }

    #[instrument(name = "coffee_machine", skip(self))]
    async fn execute(&self, command: BrewerCommand) -> Result<Ack, DriverError> {
        let mut slot = self.session.lock().await;
        let session = ensure_open(&mut *slot, || self.open()).await?;
        let result = match &command {
            BrewerCommand::Make(coffee) => make(session, coffee, &self.options).await,
            BrewerCommand::RefillAll => refill_all(session).await,
        };
        release_on_failure(&mut *slot, &result);
        result.map(|()| Ack::Completed)
    }
}

async fn make(
    session: &mut LineSession,
    coffee: &CoffeeType,
    options: &CoffeeOptions,
) -> Result<(), DriverError> {
    let request = format!("MAKE:{coffee}");
    session.send(&request).await?;

    let mut refills = 0;
    loop {
        let line = session.recv_brew_reply().await?;
        if line.starts_with("DONE:") {
            info!(coffee = %coffee, refills, "coffee done");
            return Ok(());
        }
        if line.starts_with(SHORTAGE_PREFIX) {
            if refills >= options.max_refills {
                warn!(coffee = %coffee, refills, line = %line, "ingredient shortage persists");
                return Err(DriverError::IngredientShortage(line));
            }
            refills += 1;
            info!(coffee = %coffee, attempt = refills, "ingredient shortage, refilling");
            refill_all(session).await?;
            tokio::time::sleep(options.refill_pause).await;
            session.send(&request).await?;
            continue;
        }
        if line.starts_with("ERROR") {
            return Err(DriverError::Protocol(line));
        }
        debug!(line = %line, "ignoring unexpected line while brewing");
    }
}

async fn refill_all(session: &mut LineSession) -> Result<(), DriverError> {
    session.send("REFILL:ALL").await?;
    let reply = session.recv().await?;
    if reply.starts_with("ERROR") {
        return Err(DriverError::Protocol(reply));
    }
    Ok(())
}

async fn ingredients(session: &mut LineSession) -> Result<DeviceStatus, DriverError> {
    session.send("STATUS:INGREDIENTS").await?;
    let reply = session.recv().await?;
    if reply.starts_with("ERROR") {
        return Err(DriverError::Protocol(reply));
    }
    let Some(list) = STATUS_PREFIXES
        .iter()
        .find_map(|prefix| reply.strip_prefix(prefix))
    else {
        return Err(DriverError::BadResponse {
            device: DeviceKind::CoffeeMachine,
            detail: reply,
        });
    };
    Ok(parse_inventory(list)
        .into_iter()
        .fold(DeviceStatus::idle(), |status, (name, qty)| {
            status.with_item(name, qty)
        }))
}

/// `MILK=10,BEAN=3` -> pairs. Entries that do not parse are skipped.
fn parse_inventory(list: &str) -> Vec<(String, i64)> {
    list.split(',')
        .filter_map(|pair| {
            let (name, qty) = pair.split_once('=')?;
            let qty = qty.trim().parse().ok()?;
            Some((name.trim().to_string(), qty))
        })
        .collect()
}
