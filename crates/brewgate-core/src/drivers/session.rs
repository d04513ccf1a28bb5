//! Per-driver session slot.
//!
//! A driver owns at most one live session. Operations open it lazily and
//! drop it on link failures so the next call dials again. The slot's mutex
//! also keeps two callers from interleaving frames on one connection.

use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::{DeviceKind, DriverError};

pub(crate) struct Session<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Session<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().await
    }

    pub(crate) async fn close(&self) -> Option<T> {
        self.slot.lock().await.take()
    }

    #[cfg(test)]
    pub(crate) async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

/// Reuse the session in `slot` or open a new one.
pub(crate) async fn ensure_open<'a, T, F, Fut>(
    slot: &'a mut Option<T>,
    open: F,
) -> Result<&'a mut T, DriverError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let session = match slot.take() {
        Some(existing) => existing,
        None => open().await?,
    };
    Ok(slot.insert(session))
}

/// Forget the session if `result` says the link is gone.
pub(crate) fn release_on_failure<T, R>(slot: &mut Option<T>, result: &Result<R, DriverError>) {
    if let Err(err) = result
        && err.is_link_failure()
    {
        tracing::debug!(error = %err, "dropping device session");
        *slot = None;
    }
}

/// TCP connect bounded by `timeout`.
pub(crate) async fn dial(
    device: DeviceKind,
    addr: &str,
    timeout: Duration,
) -> Result<TcpStream, DriverError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(source)) => Err(DriverError::Connect {
            device,
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(DriverError::ConnectTimeout {
            device,
            addr: addr.to_string(),
            timeout,
        }),
    }
}

/// Bound a request/response exchange. Expiry is reported as an I/O timeout,
/// which counts as a link failure.
pub(crate) async fn within<T, Fut>(timeout: Duration, exchange: Fut) -> Result<T, DriverError>
where
    Fut: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no response within {timeout:?}"),
        ))),
    }
}
