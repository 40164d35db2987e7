// ── Domain model ──
//
// Value types shared by every device runtime, the collector, and sinks.

pub mod data;
pub mod register;
pub mod status;

pub use data::{DataPoint, DataType};
pub use register::{Register, default_registers};
pub use status::{DeviceStatus, StatusChange};
