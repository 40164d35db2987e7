// ── Device status ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a device. Exactly one is current at any time.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Offline,
    Online,
    Error,
    Maintenance,
}

impl DeviceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// A status transition. Only published when `previous != current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub device: String,
    pub previous: DeviceStatus,
    pub current: DeviceStatus,
}
