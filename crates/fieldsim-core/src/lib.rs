//! Device lifecycle and concurrency layer for simulated industrial field
//! devices.
//!
//! - **[`Device`]**: cheaply cloneable handle owning at most one worker
//!   task. [`start()`](Device::start) / [`stop()`](Device::stop) are
//!   idempotent; run-loop faults become a [`DeviceStatus::Error`]
//!   transition rather than a propagated error. Data points and status
//!   transitions are published on `tokio::sync::broadcast` channels.
//!
//! - **Runtimes** ([`device`]): the closed set [`DeviceKind`] of a
//!   register-polling device ([`PolledRuntime`]) and a TCP
//!   broadcast-server device ([`BroadcastRuntime`]) whose clients live in
//!   a mutex-guarded [`ClientRegistry`].
//!
//! - **[`DeviceCollector`]**: named registry with replace-on-add
//!   semantics, group start/stop, and a monitor task publishing
//!   [`MonitorReport`]s.
//!
//! - **Sinks** ([`sink`]): the [`DataSink`] persistence interface plus a
//!   pump that forwards a device's channels into it.

pub mod collector;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod simulation;
pub mod sink;

// ── Primary re-exports ──────────────────────────────────────────────
pub use collector::{DeviceCollector, MonitorReport, StartMode, StopMode};
pub use config::{CollectorConfig, DeviceConfig};
pub use device::{
    BroadcastRuntime, ClientId, ClientRegistry, Device, DeviceContext, DeviceKind, DeviceRuntime,
    PolledRuntime,
};
pub use error::{CoreError, ErrorCode};
pub use model::{DataPoint, DataType, DeviceStatus, Register, StatusChange, default_registers};
pub use simulation::{DriftSimulator, ValueSimulator};
pub use sink::{DataSink, JsonLinesSink, TracingSink, spawn_sink_pump};
