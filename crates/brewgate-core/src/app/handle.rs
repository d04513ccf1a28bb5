//! GatewayHandle - owns the background loops of a started gateway.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// - `request_shutdown` stops the poller, the intake loop and the syncer
/// - `shutdown_and_join` also waits for them to exit
///
/// Orders already being processed are not interrupted; each runs its
/// device steps to completion or to the driver's own timeout.
pub struct GatewayHandle {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    pub(crate) fn new(shutdown: CancellationToken, joins: Vec<JoinHandle<()>>) -> Self {
        Self { shutdown, joins }
    }

    /// Token the loops watch. Cancelling it is the same as
    /// `request_shutdown`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "background loop panicked");
            }
        }
    }
}
