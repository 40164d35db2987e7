// ── Emitted data ──

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Category of an emitted measurement.
///
/// The lowercase string form is what appears on the broadcast wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Temperature,
    Pressure,
    Flow,
    Status,
    Custom,
}

/// One measurement emitted by a device. Created fresh on every emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Local>,
    pub data_type: DataType,
    pub value: f64,
    pub unit: String,
    pub source: String,
}

impl DataPoint {
    /// Build a point stamped with the current local time.
    pub fn new(
        data_type: DataType,
        value: f64,
        unit: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            data_type,
            value,
            unit: unit.into(),
            source: source.into(),
        }
    }
}
