//! Modbus TCP register access.
//!
//! Framing lives in `tokio-modbus`; this module only puts its client behind
//! the `RegisterLink` seam and maps its errors. The grinder uses holding
//! registers (0x03 read, 0x06 write).

use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::slave::Slave;

use super::session::{dial, within};
use crate::domain::{DeviceKind, DriverError};

/// An open register session.
#[async_trait]
pub trait RegisterBus: Send {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DriverError>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), DriverError>;

    async fn read_register(&mut self, address: u16) -> Result<u16, DriverError> {
        let values = self.read_registers(address, 1).await?;
        values.first().copied().ok_or_else(|| DriverError::BadResponse {
            device: DeviceKind::Grinder,
            detail: format!("empty read at register {address}"),
        })
    }
}

/// Opens register sessions.
#[async_trait]
pub trait RegisterLink: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RegisterBus>, DriverError>;
}

/// Dials a Modbus TCP server.
#[derive(Debug, Clone)]
pub struct ModbusTcpLink {
    addr: String,
    unit_id: u8,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl ModbusTcpLink {
    pub fn new(addr: impl Into<String>, unit_id: u8) -> Self {
        Self {
            addr: addr.into(),
            unit_id,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, response: Duration) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }
}

#[async_trait]
impl RegisterLink for ModbusTcpLink {
    async fn open(&self) -> Result<Box<dyn RegisterBus>, DriverError> {
        let stream = dial(DeviceKind::Grinder, &self.addr, self.connect_timeout).await?;
        let context = tokio_modbus::client::tcp::attach_slave(stream, Slave(self.unit_id));
        tracing::debug!(addr = %self.addr, unit_id = self.unit_id, "modbus session opened");
        Ok(Box::new(ModbusTcpClient {
            context,
            response_timeout: self.response_timeout,
        }))
    }
}

struct ModbusTcpClient {
    context: Context,
    response_timeout: Duration,
}

#[async_trait]
impl RegisterBus for ModbusTcpClient {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DriverError> {
        let context = &mut self.context;
        let values = within(self.response_timeout, async move {
            lift(context.read_holding_registers(address, count).await, "read", address)
        })
        .await?;
        if values.len() != usize::from(count) {
            return Err(DriverError::BadResponse {
                device: DeviceKind::Grinder,
                detail: format!("{} registers for a read of {count}", values.len()),
            });
        }
        Ok(values)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), DriverError> {
        let context = &mut self.context;
        within(self.response_timeout, async move {
            lift(context.write_single_register(address, value).await, "write", address)
        })
        .await
    }
}

/// An exception reply is the device refusing the request, so the session
/// stays up. Anything else from the client means the stream is unusable.
fn lift<T>(result: tokio_modbus::Result<T>, op: &str, address: u16) -> Result<T, DriverError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(DriverError::Protocol(format!(
            "modbus exception {code:?} on {op} of register {address}"
        ))),
        Err(tokio_modbus::Error::Transport(err)) => Err(DriverError::Io(err)),
        Err(err) => Err(DriverError::BadResponse {
            device: DeviceKind::Grinder,
            detail: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_modbus::Exception as ExceptionCode;

    #[test]
    fn exceptions_keep_the_session() {
        let err = lift::<()>(Ok(Err(ExceptionCode::IllegalDataAddress)), "read", 9).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
        assert!(!err.is_link_failure());
        assert!(err.to_string().contains("register 9"), "{err}");
    }

    #[test]
    fn transport_errors_drop_the_session() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        let err = lift::<()>(Err(tokio_modbus::Error::Transport(io)), "write", 0).unwrap_err();
        assert!(err.is_link_failure());
    }

    type Reply = fn(&[u8; 12]) -> Vec<u8>;

    /// Answers each 12-byte request with `reply(request)`.
    async fn serve(listener: TcpListener, replies: Vec<Reply>) -> Vec<[u8; 12]> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        for reply in replies {
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&reply(&request)).await.unwrap();
            seen.push(request);
        }
        seen
    }

    fn holding_50(request: &[u8; 12]) -> Vec<u8> {
        let mut frame = request[..4].to_vec();
        frame.extend_from_slice(&[0x00, 0x07, request[6], 0x03, 0x04, 0x00, 0x00, 0x00, 0x32]);
        frame
    }

    fn echo(request: &[u8; 12]) -> Vec<u8> {
        request.to_vec()
    }

    fn illegal_address(request: &[u8; 12]) -> Vec<u8> {
        let mut frame = request[..4].to_vec();
        frame.extend_from_slice(&[0x00, 0x03, request[6], 0x83, 0x02]);
        frame
    }

    #[tokio::test]
    async fn talks_to_a_modbus_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve(
            listener,
            vec![holding_50 as Reply, echo as Reply, illegal_address as Reply],
        ));

        let mut bus = ModbusTcpLink::new(addr, 1).open().await.unwrap();
        assert_eq!(bus.read_registers(1, 2).await.unwrap(), vec![0, 50]);
        bus.write_register(0, 1).await.unwrap();
        let err = bus.read_register(40).await.unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)), "{err}");

        let seen = server.await.unwrap();
        // unit id, function, address, count/value
        assert_eq!(&seen[0][6..], &[0x01, 0x03, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(&seen[1][6..], &[0x01, 0x06, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&seen[2][6..], &[0x01, 0x03, 0x00, 0x28, 0x00, 0x01]);
    }
}
