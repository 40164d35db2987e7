// ── Device collector ──
//
// Owns a named set of devices and a low-frequency monitor task. The
// monitor only observes; it never drives data generation.
//
// Membership lives in a `DashMap` so the monitor can scan it without
// locking. Every mutation and every group start/stop goes through one
// async mutex, so add/remove cannot interleave with a collector start.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::device::Device;
use crate::model::DeviceStatus;

const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// What `start_with` does besides launching the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Only the monitor. Devices start when added to a running collector.
    #[default]
    MonitorOnly,
    /// Also start every registered, enabled device.
    StartDevices,
}

/// What `stop_with` does besides stopping the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Only the monitor. Member devices keep running.
    #[default]
    MonitorOnly,
    /// Also stop every registered device, joining their workers.
    Cascade,
}

/// Latest monitor observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub ticks: u64,
    pub total: usize,
    pub running: usize,
    pub online: usize,
    pub error: usize,
}

// ── DeviceCollector ──────────────────────────────────────────────

/// Group lifecycle control and dynamic membership for devices.
///
/// Cheaply cloneable via `Arc<CollectorInner>`.
#[derive(Clone)]
pub struct DeviceCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    config: CollectorConfig,
    devices: DashMap<String, Device>,
    running: AtomicBool,
    report: watch::Sender<MonitorReport>,
    lifecycle: Mutex<Option<Monitor>>,
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Default for DeviceCollector {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}

impl DeviceCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let (report, _) = watch::channel(MonitorReport::default());
        Self {
            inner: Arc::new(CollectorInner {
                config,
                devices: DashMap::new(),
                running: AtomicBool::new(false),
                report,
                lifecycle: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ── Membership ───────────────────────────────────────────────

    /// Register a device, replacing any device with the same name.
    ///
    /// The replaced device is stopped before the new one is inserted. If
    /// the collector is running and the new device is enabled, it is
    /// started immediately; a start failure is logged, not returned.
    pub async fn add_device(&self, device: Device) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let name = device.name().to_owned();

        let previous = self.inner.devices.get(&name).map(|d| d.value().clone());
        if let Some(previous) = previous {
            info!(device = %name, "replacing existing device");
            previous.stop().await;
        }
        self.inner.devices.insert(name.clone(), device.clone());
        debug!(device = %name, total = self.inner.devices.len(), "device registered");

        if self.is_running() && device.config().enabled {
            if let Err(e) = device.start().await {
                warn!(device = %name, error = %e, "device failed to start on add");
            }
        }
    }

    /// Stop and unregister a device. Unknown names are a no-op.
    pub async fn remove_device(&self, name: &str) -> Option<Device> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let device = self.inner.devices.get(name).map(|d| d.value().clone())?;
        device.stop().await;
        self.inner.devices.remove(name);
        info!(device = %name, "device removed");
        Some(device)
    }

    pub fn device(&self, name: &str) -> Option<Device> {
        self.inner.devices.get(name).map(|d| d.value().clone())
    }

    /// Registered device names, sorted.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.devices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    /// Current status of every device, sorted by name.
    pub fn statuses(&self) -> Vec<(String, DeviceStatus)> {
        let mut statuses: Vec<(String, DeviceStatus)> = self
            .inner
            .devices
            .iter()
            .map(|e| (e.key().clone(), e.value().status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    pub fn monitor_reports(&self) -> watch::Receiver<MonitorReport> {
        self.inner.report.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start the monitor. Devices are left alone.
    pub async fn start(&self) {
        self.start_with(StartMode::MonitorOnly).await;
    }

    /// Start the monitor (if not already running) and apply `mode`.
    pub async fn start_with(&self, mode: StartMode) {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if lifecycle.is_none() {
            self.inner.running.store(true, Ordering::Release);
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(monitor_loop(Arc::clone(&self.inner), cancel.clone()));
            *lifecycle = Some(Monitor { cancel, handle });
            info!(devices = self.inner.devices.len(), "collector started");
        }

        if mode == StartMode::StartDevices {
            for device in self.snapshot() {
                if !device.config().enabled {
                    debug!(device = device.name(), "skipping disabled device");
                    continue;
                }
                if let Err(e) = device.start().await {
                    warn!(device = device.name(), error = %e, "device failed to start");
                }
            }
        }
    }

    /// Stop the monitor. Member devices keep running.
    pub async fn stop(&self) {
        self.stop_with(StopMode::MonitorOnly).await;
    }

    /// Stop the monitor and apply `mode`.
    pub async fn stop_with(&self, mode: StopMode) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.inner.running.store(false, Ordering::Release);

        if let Some(monitor) = lifecycle.take() {
            monitor.cancel.cancel();
            if let Err(e) = monitor.handle.await {
                warn!(error = %e, "monitor task did not join cleanly");
            }
            info!("collector stopped");
        }

        if mode == StopMode::Cascade {
            for device in self.snapshot() {
                device.stop().await;
            }
        }
    }

    fn snapshot(&self) -> Vec<Device> {
        self.inner.devices.iter().map(|e| e.value().clone()).collect()
    }
}

// ── Monitor ──────────────────────────────────────────────────────

async fn monitor_loop(inner: Arc<CollectorInner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(inner.config.monitor_interval.max(MIN_MONITOR_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0_u64;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                ticks += 1;
                let report = inner.scan(ticks);
                if inner.config.summary_every > 0 && ticks % inner.config.summary_every == 0 {
                    info!(
                        total = report.total,
                        running = report.running,
                        online = report.online,
                        error = report.error,
                        "collector summary"
                    );
                }
                inner.report.send_replace(report);
            }
        }
    }
    debug!(ticks, "monitor loop stopped");
}

impl CollectorInner {
    fn scan(&self, ticks: u64) -> MonitorReport {
        let mut report = MonitorReport {
            ticks,
            ..MonitorReport::default()
        };
        for entry in &self.devices {
            let device = entry.value();
            report.total += 1;
            if device.is_running() {
                report.running += 1;
            }
            match device.status() {
                DeviceStatus::Online => report.online += 1,
                DeviceStatus::Error => {
                    report.error += 1;
                    warn!(device = %entry.key(), "device is in error state");
                }
                DeviceStatus::Offline | DeviceStatus::Maintenance => {}
            }
        }
        report
    }
}
