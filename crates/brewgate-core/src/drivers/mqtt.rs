//! MQTT transport for the delivery robot (rumqttc).

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::robot::{DeliveryCommand, DeliveryStatusReport, RobotLink, RobotReplies};
use crate::domain::{DeviceKind, DriverError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub command_topic: String,
    pub status_topic: String,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "brewgate".to_string(),
            command_topic: "test/delivery_robot/command".to_string(),
            status_topic: "test/delivery_robot/status".to_string(),
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Connection {
    client: AsyncClient,
    shutdown: CancellationToken,
    event_loop: JoinHandle<()>,
}

/// One broker connection shared by every delivery. The event loop task
/// resubscribes after each reconnect and routes status reports to the
/// pending deliveries.
pub struct MqttLink {
    settings: MqttSettings,
    connection: Mutex<Option<Connection>>,
}

impl MqttLink {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RobotLink for MqttLink {
    async fn connect(&self, replies: Arc<RobotReplies>) -> Result<(), DriverError> {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| !c.event_loop.is_finished()) {
            return Ok(());
        }

        let mut options = MqttOptions::new(
            &self.settings.client_id,
            &self.settings.host,
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        let (client, event_loop) = AsyncClient::new(options, 64);

        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let event_loop = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            self.settings.status_topic.clone(),
            replies,
            shutdown.clone(),
            ready_tx,
        ));

        let timeout = self.settings.connect_timeout;
        let outcome = tokio::time::timeout(timeout, ready_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(DriverError::Transport(reason)),
            Ok(Err(_)) => Some(DriverError::NotConnected(DeviceKind::DeliveryRobot)),
            Err(_) => Some(DriverError::ConnectTimeout {
                device: DeviceKind::DeliveryRobot,
                addr: self.settings.addr(),
                timeout,
            }),
        };
        if let Some(err) = failure {
            shutdown.cancel();
            return Err(err);
        }

        info!(addr = %self.settings.addr(), topic = %self.settings.status_topic, "connected to MQTT broker");
        *connection = Some(Connection {
            client,
            shutdown,
            event_loop,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        connection.shutdown.cancel();
        let result = connection
            .client
            .disconnect()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()));
        let _ = connection.event_loop.await;
        result
    }

    async fn publish(&self, command: &DeliveryCommand) -> Result<(), DriverError> {
        let payload = serde_json::to_vec(command)?;
        let connection = self.connection.lock().await;
        let Some(connection) = connection.as_ref() else {
            return Err(DriverError::NotConnected(DeviceKind::DeliveryRobot));
        };
        connection
            .client
            .publish(&self.settings.command_topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    status_topic: String,
    replies: Arc<RobotReplies>,
    shutdown: CancellationToken,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = client.try_subscribe(&status_topic, QoS::AtLeastOnce) {
                    warn!(error = %e, topic = %status_topic, "status subscription failed");
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == status_topic => {
                route_status(&replies, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e.to_string()));
                    return;
                }
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}

async fn route_status(replies: &RobotReplies, payload: &[u8]) {
    let report: DeliveryStatusReport = match serde_json::from_slice(payload) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "malformed delivery status");
            return;
        }
    };
    let order_id = report.order_id.clone();
    if !replies.complete(&order_id, report).await {
        debug!(order_id = %order_id, "delivery status with no waiter, dropped");
    }
}
