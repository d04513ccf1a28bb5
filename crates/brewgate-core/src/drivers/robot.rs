//! Delivery robot driver.
//!
//! The robot listens on a command topic and reports progress on a status
//! topic. A delivery is a request/response pair correlated by order id
//! through `PendingRequests`.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::mqtt::{MqttLink, MqttSettings};
use super::pending::PendingRequests;
use crate::domain::{CoffeeType, DeliveryRequest, DeviceKind, DeviceStatus, DriverError};
use crate::ports::{Ack, Device, IdGenerator, RobotCommand};

/// What to do when the robot does not answer within the ack window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTimeoutPolicy {
    /// Treat silence as success.
    #[default]
    Soft,
    /// Fail the delivery.
    Hard,
}

impl fmt::Display for DeliveryTimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryTimeoutPolicy::Soft => f.write_str("soft"),
            DeliveryTimeoutPolicy::Hard => f.write_str("hard"),
        }
    }
}

impl FromStr for DeliveryTimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(DeliveryTimeoutPolicy::Soft),
            "hard" => Ok(DeliveryTimeoutPolicy::Hard),
            other => Err(format!("unknown delivery timeout policy '{other}'")),
        }
    }
}

/// Payload published on the command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCommand {
    pub order_id: String,
    pub coffee_type: CoffeeType,
    pub need_ice: bool,
    pub table_number: i32,
}

/// Payload received on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryStatusReport {
    #[serde(deserialize_with = "order_id_text")]
    pub order_id: String,
    pub status: String,
}

impl DeliveryStatusReport {
    pub fn is_failure(&self) -> bool {
        self.status == "DELIVERY_FAILED" || self.status.starts_with("ERROR")
    }
}

/// Robots report the id back either as the string we sent or as a number.
fn order_id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

pub type RobotReplies = PendingRequests<String, DeliveryStatusReport>;

/// Transport to the robot. `connect` is idempotent; status reports that
/// arrive after it are fed into `replies`.
#[async_trait]
pub trait RobotLink: Send + Sync {
    async fn connect(&self, replies: Arc<RobotReplies>) -> Result<(), DriverError>;

    async fn disconnect(&self) -> Result<(), DriverError>;

    async fn publish(&self, command: &DeliveryCommand) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotOptions {
    pub ack_timeout: Duration,
    pub timeout_policy: DeliveryTimeoutPolicy,
}

impl Default for RobotOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            timeout_policy: DeliveryTimeoutPolicy::Soft,
        }
    }
}

pub struct DeliveryRobotDriver {
    link: Arc<dyn RobotLink>,
    replies: Arc<RobotReplies>,
    ids: Arc<dyn IdGenerator>,
    options: RobotOptions,
}

impl DeliveryRobotDriver {
    pub fn new(link: Arc<dyn RobotLink>, ids: Arc<dyn IdGenerator>, options: RobotOptions) -> Self {
        Self {
            link,
            replies: Arc::new(RobotReplies::new()),
            ids,
            options,
        }
    }

    pub fn mqtt(settings: MqttSettings, ids: Arc<dyn IdGenerator>, options: RobotOptions) -> Self {
        Self::new(Arc::new(MqttLink::new(settings)), ids, options)
    }

    async fn deliver(&self, request: DeliveryRequest) -> Result<Ack, DriverError> {
        self.link.connect(Arc::clone(&self.replies)).await?;

        let order_id = request
            .order_id
            .unwrap_or_else(|| self.ids.generate_correlation_id().to_string());
        let command = DeliveryCommand {
            order_id: order_id.clone(),
            coffee_type: request.coffee_type,
            need_ice: request.need_ice,
            table_number: request.table_number,
        };

        let reply = self.replies.register(order_id.clone()).await;
        if let Err(err) = self.link.publish(&command).await {
            self.replies.cancel(&order_id).await;
            return Err(err);
        }
        info!(order_id = %order_id, table = command.table_number, "delivery dispatched");

        match self
            .replies
            .wait(&order_id, reply, self.options.ack_timeout)
            .await
        {
            Some(report) if report.is_failure() => Err(DriverError::DeliveryFailed {
                order_id,
                status: report.status,
            }),
            Some(report) => {
                info!(order_id = %order_id, status = %report.status, "delivery acknowledged");
                Ok(Ack::Completed)
            }
            None => match self.options.timeout_policy {
                DeliveryTimeoutPolicy::Soft => {
                    warn!(
                        order_id = %order_id,
                        waited = ?self.options.ack_timeout,
                        "no delivery status, assuming delivered"
                    );
                    Ok(Ack::Unacknowledged)
                }
                DeliveryTimeoutPolicy::Hard => Err(DriverError::DeliveryTimeout { order_id }),
            },
        }
    }
}

#[async_trait]
impl Device for DeliveryRobotDriver {
    type Command = RobotCommand;

    fn kind(&self) -> DeviceKind {
        DeviceKind::DeliveryRobot
    }

    async fn connect(&self) -> Result<(), DriverError> {
        self.link.connect(Arc::clone(&self.replies)).await
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.link.disconnect().await
    }

    /// Idle when no delivery is waiting for its status.
    async fn query_status(&self) -> Result<DeviceStatus, DriverError> {
        let in_flight = self.replies.len().await;
        Ok(DeviceStatus {
            idle: in_flight == 0,
            ..DeviceStatus::default()
        }
        .with_item("in_flight", in_flight as i64))
    }

    #[instrument(name = "delivery_robot", skip(self))]
    async fn execute(&self, command: RobotCommand) -> Result<Ack, DriverError> {
        match command {
            RobotCommand::Deliver(request) => self.deliver(request).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeRobotLink, RobotBehaviour};
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};

    fn robot(link: &FakeRobotLink, policy: DeliveryTimeoutPolicy) -> DeliveryRobotDriver {
        DeliveryRobotDriver::new(
            Arc::new(link.clone()),
            Arc::new(UlidGenerator::new(SystemClock)),
            RobotOptions {
                ack_timeout: Duration::from_millis(50),
                timeout_policy: policy,
            },
        )
    }

    fn request(order_id: Option<&str>) -> RobotCommand {
        RobotCommand::Deliver(DeliveryRequest {
            order_id: order_id.map(str::to_string),
            coffee_type: CoffeeType::new("LATTE"),
            need_ice: true,
            table_number: 8,
        })
    }

    #[tokio::test]
    async fn completed_delivery_is_acknowledged() {
        let link = FakeRobotLink::new(RobotBehaviour::Reply("DELIVERY_COMPLETE"));

        let ack = robot(&link, DeliveryTimeoutPolicy::Soft)
            .execute(request(Some("17")))
            .await
            .unwrap();

        assert_eq!(ack, Ack::Completed);
        let sent = link.published();
        assert_eq!(sent[0].order_id, "17");
        assert_eq!(sent[0].table_number, 8);
    }

    #[tokio::test]
    async fn failed_status_is_an_error() {
        let link = FakeRobotLink::new(RobotBehaviour::Reply("DELIVERY_FAILED"));

        let err = robot(&link, DeliveryTimeoutPolicy::Soft)
            .execute(request(Some("3")))
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::DeliveryFailed { ref status, .. } if status == "DELIVERY_FAILED"));
    }

    #[tokio::test]
    async fn silence_is_success_under_the_soft_policy() {
        let link = FakeRobotLink::new(RobotBehaviour::Silent);
        let driver = robot(&link, DeliveryTimeoutPolicy::Soft);

        let ack = driver.execute(request(Some("5"))).await.unwrap();

        assert_eq!(ack, Ack::Unacknowledged);
        assert!(driver.query_status().await.unwrap().idle);
    }

    #[tokio::test]
    async fn silence_fails_under_the_hard_policy() {
        let link = FakeRobotLink::new(RobotBehaviour::Silent);

        let err = robot(&link, DeliveryTimeoutPolicy::Hard)
            .execute(request(Some("5")))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "delivery task for order [5] timed out");
    }

    #[tokio::test]
    async fn late_failure_after_soft_timeout_is_dropped() {
        let link = FakeRobotLink::new(RobotBehaviour::ReplyAfter(
            "DELIVERY_FAILED",
            Duration::from_millis(100),
        ));

        let ack = robot(&link, DeliveryTimeoutPolicy::Soft)
            .execute(request(Some("9")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(ack, Ack::Unacknowledged);
        assert_eq!(link.late_dropped(), 1);
    }

    #[tokio::test]
    async fn missing_order_id_gets_a_correlation_id() {
        let link = FakeRobotLink::new(RobotBehaviour::Reply("DELIVERY_COMPLETE"));

        robot(&link, DeliveryTimeoutPolicy::Soft)
            .execute(request(None))
            .await
            .unwrap();

        assert!(link.published()[0].order_id.starts_with("dlv-"));
    }

    #[test]
    fn status_reports_accept_numeric_ids() {
        let report: DeliveryStatusReport =
            serde_json::from_str(r#"{"order_id": 42, "status": "DELIVERY_COMPLETE"}"#).unwrap();
        assert_eq!(report.order_id, "42");
        assert!(!report.is_failure());

        let report: DeliveryStatusReport =
            serde_json::from_str(r#"{"order_id": "x", "status": "ERROR:BLOCKED"}"#).unwrap();
        assert!(report.is_failure());
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("HARD".parse::<DeliveryTimeoutPolicy>().unwrap(), DeliveryTimeoutPolicy::Hard);
        assert!("maybe".parse::<DeliveryTimeoutPolicy>().is_err());
    }
}
