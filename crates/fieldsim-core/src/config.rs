// ── Runtime device configuration ──
//
// These types describe *how* a device runs. They never touch disk;
// `fieldsim-config` builds them from TOML profiles and hands them in.

use std::time::Duration;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RESET_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_MAX_CLIENTS: usize = 64;
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Per-device configuration.
///
/// `name` is the device's identity inside a collector and is fixed for
/// the lifetime of a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Period of one run-loop tick.
    pub update_interval: Duration,
    pub enabled: bool,
    /// Upper bound on concurrently served clients (broadcast devices only).
    pub max_clients: usize,
    /// Pause between stop and start during a reset.
    pub reset_grace: Duration,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_reset_grace(mut self, grace: Duration) -> Self {
        self.reset_grace = grace;
        self
    }

    /// `address:port` as a single string, used for binding and in logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: "127.0.0.1".into(),
            port: 0,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            enabled: true,
            max_clients: DEFAULT_MAX_CLIENTS,
            reset_grace: DEFAULT_RESET_GRACE,
        }
    }
}

/// Collector-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// How often the monitor task scans device statuses.
    pub monitor_interval: Duration,
    /// Monitor ticks between summary log lines.
    pub summary_every: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            summary_every: 10,
        }
    }
}
