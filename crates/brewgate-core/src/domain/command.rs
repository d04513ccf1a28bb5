//! Uniform command model used by the synchronous command endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::CoffeeType;

/// The four physical device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Grinder,
    CoffeeMachine,
    IceMaker,
    DeliveryRobot,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::Grinder,
        DeviceKind::CoffeeMachine,
        DeviceKind::IceMaker,
        DeviceKind::DeliveryRobot,
    ];

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Grinder => "grinder",
            DeviceKind::CoffeeMachine => "coffeemachine",
            DeviceKind::IceMaker => "ice_maker",
            DeviceKind::DeliveryRobot => "delivery_robots",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device '{0}'")]
pub struct UnknownDevice(pub String);

impl FromStr for DeviceKind {
    type Err = UnknownDevice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grinder" => Ok(DeviceKind::Grinder),
            "coffeemachine" | "coffee_machine" => Ok(DeviceKind::CoffeeMachine),
            "ice_maker" | "icemaker" => Ok(DeviceKind::IceMaker),
            "delivery_robots" | "delivery_robot" => Ok(DeviceKind::DeliveryRobot),
            _ => Err(UnknownDevice(s.to_string())),
        }
    }
}

/// Request accepted by the command endpoint.
///
/// Only `device` and `action` are always required; the rest is read by the
/// actions that need it and defaulted otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedCommand {
    pub device: String,
    pub action: String,
    #[serde(default)]
    pub coffee_type: String,
    #[serde(default)]
    pub need_ice: bool,
    #[serde(default)]
    pub table_number: i32,
    #[serde(default)]
    pub ice_amount: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Response of the command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// What the robot needs to know to carry a drink to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Correlates the robot's status reply; minted by the driver when absent.
    pub order_id: Option<String>,
    pub coffee_type: CoffeeType,
    pub need_ice: bool,
    pub table_number: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("grinder", DeviceKind::Grinder)]
    #[case("coffeemachine", DeviceKind::CoffeeMachine)]
    #[case("coffee_machine", DeviceKind::CoffeeMachine)]
    #[case("ice_maker", DeviceKind::IceMaker)]
    #[case("icemaker", DeviceKind::IceMaker)]
    #[case("delivery_robots", DeviceKind::DeliveryRobot)]
    #[case("Delivery_Robot", DeviceKind::DeliveryRobot)]
    fn device_names_and_aliases(#[case] name: &str, #[case] expected: DeviceKind) {
        assert_eq!(name.parse::<DeviceKind>().unwrap(), expected);
    }

    #[test]
    fn unknown_device_is_rejected() {
        assert_eq!(
            "toaster".parse::<DeviceKind>(),
            Err(UnknownDevice("toaster".to_string()))
        );
    }

    #[test]
    fn command_defaults_optional_fields() {
        let cmd: UnifiedCommand =
            serde_json::from_str(r#"{"device":"grinder","action":"grind"}"#).unwrap();
        assert_eq!(cmd.device, "grinder");
        assert_eq!(cmd.ice_amount, 0);
        assert!(cmd.order_id.is_none());
    }
}
