// ── Device lifecycle ──
//
// A `Device` owns at most one worker task, a status value, and two
// outbound channels (data points and status transitions). What the
// worker actually does is delegated to a `DeviceRuntime`.
//
// State machine:
//   Offline --start--> Online --stop--> Offline
//   any --run-loop fault--> Error --stop--> Offline
//   reset = stop, grace delay, start

pub mod broadcast;
pub mod polled;
pub mod protocol;
pub mod registry;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use tokio::sync::{Mutex, broadcast as bcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::model::{DataPoint, DataType, DeviceStatus, StatusChange};

pub use broadcast::BroadcastRuntime;
pub use polled::PolledRuntime;
pub use registry::{ClientId, ClientRegistry};

const DATA_CHANNEL_SIZE: usize = 1024;
const STATUS_CHANNEL_SIZE: usize = 64;

// ── DeviceRuntime ────────────────────────────────────────────────

/// Behaviour plugged into a [`Device`].
///
/// `initialize` runs on the caller's task inside `start()`; an error there
/// aborts the start. `run` is the worker body and must return promptly once
/// the context's cancellation token fires. `cleanup` runs after the worker
/// has been joined.
pub trait DeviceRuntime: Send + Sync + 'static {
    fn initialize(&self, ctx: &DeviceContext)
    -> impl Future<Output = Result<(), CoreError>> + Send;

    fn run(&self, ctx: DeviceContext) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn cleanup(&self, ctx: &DeviceContext) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// The closed set of device runtimes.
pub enum DeviceKind {
    Polled(PolledRuntime),
    Broadcast(BroadcastRuntime),
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Polled(_) => "polled",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

impl DeviceRuntime for DeviceKind {
    async fn initialize(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        match self {
            Self::Polled(rt) => rt.initialize(ctx).await,
            Self::Broadcast(rt) => rt.initialize(ctx).await,
        }
    }

    async fn run(&self, ctx: DeviceContext) -> Result<(), CoreError> {
        match self {
            Self::Polled(rt) => rt.run(ctx).await,
            Self::Broadcast(rt) => rt.run(ctx).await,
        }
    }

    async fn cleanup(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        match self {
            Self::Polled(rt) => rt.cleanup(ctx).await,
            Self::Broadcast(rt) => rt.cleanup(ctx).await,
        }
    }
}

// ── DeviceContext ────────────────────────────────────────────────

/// Everything a runtime needs while running: identity, the configuration
/// snapshot taken at start, the cancellation token, and the data channel.
#[derive(Clone)]
pub struct DeviceContext {
    name: Arc<str>,
    config: Arc<DeviceConfig>,
    cancel: CancellationToken,
    data_tx: bcast::Sender<Arc<DataPoint>>,
}

impl DeviceContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the device is being stopped.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A fresh point sourced from this device.
    pub fn point(&self, data_type: DataType, value: f64, unit: impl Into<String>) -> DataPoint {
        DataPoint::new(data_type, value, unit, &*self.name)
    }

    /// Publish a data point. Never blocks; with no subscribers the point
    /// is dropped.
    pub fn emit(&self, point: DataPoint) {
        let _ = self.data_tx.send(Arc::new(point));
    }
}

// ── Device ───────────────────────────────────────────────────────

/// Handle to a lifecycle-managed device.
///
/// Cheaply cloneable via `Arc<DeviceInner>`. All clones refer to the same
/// worker, status, and channels.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    name: Arc<str>,
    runtime: DeviceKind,
    config: ArcSwap<DeviceConfig>,
    status: watch::Sender<DeviceStatus>,
    status_tx: bcast::Sender<StatusChange>,
    data_tx: bcast::Sender<Arc<DataPoint>>,
    /// True while a worker task is alive.
    running: AtomicBool,
    /// Serializes start/stop/reset.
    lifecycle: Mutex<Option<Worker>>,
}

struct Worker {
    ctx: DeviceContext,
    handle: JoinHandle<()>,
}

impl Device {
    pub fn new(config: DeviceConfig, runtime: DeviceKind) -> Self {
        let (status, _) = watch::channel(DeviceStatus::Offline);
        let (status_tx, _) = bcast::channel(STATUS_CHANNEL_SIZE);
        let (data_tx, _) = bcast::channel(DATA_CHANNEL_SIZE);

        Self {
            inner: Arc::new(DeviceInner {
                name: Arc::from(config.name.as_str()),
                runtime,
                config: ArcSwap::from_pointee(config),
                status,
                status_tx,
                data_tx,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// A register-polling device with the default register table.
    pub fn polled(config: DeviceConfig) -> Self {
        Self::new(config, DeviceKind::Polled(PolledRuntime::default()))
    }

    /// A TCP broadcast-server device.
    pub fn broadcast(config: DeviceConfig) -> Self {
        Self::new(config, DeviceKind::Broadcast(BroadcastRuntime::new()))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.inner.runtime
    }

    pub fn as_polled(&self) -> Option<&PolledRuntime> {
        match &self.inner.runtime {
            DeviceKind::Polled(rt) => Some(rt),
            DeviceKind::Broadcast(_) => None,
        }
    }

    pub fn as_broadcast(&self) -> Option<&BroadcastRuntime> {
        match &self.inner.runtime {
            DeviceKind::Broadcast(rt) => Some(rt),
            DeviceKind::Polled(_) => None,
        }
    }

    /// Current stored configuration (may differ from the one the running
    /// worker was started with).
    pub fn config(&self) -> Arc<DeviceConfig> {
        self.inner.config.load_full()
    }

    pub fn status(&self) -> DeviceStatus {
        *self.inner.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Replace the stored configuration.
    ///
    /// Takes effect on the next start; a running worker keeps the snapshot
    /// it was started with. The name is the device's identity and cannot
    /// change.
    pub fn update_config(&self, config: DeviceConfig) -> Result<(), CoreError> {
        if config.name != *self.inner.name {
            return Err(CoreError::Validation {
                message: format!(
                    "device name is fixed: '{}' cannot become '{}'",
                    self.inner.name, config.name
                ),
            });
        }
        self.inner.config.store(Arc::new(config));
        debug!(device = %self.inner.name, "configuration replaced");
        Ok(())
    }

    // ── Subscriptions ────────────────────────────────────────────

    pub fn subscribe_data(&self) -> bcast::Receiver<Arc<DataPoint>> {
        self.inner.data_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> bcast::Receiver<StatusChange> {
        self.inner.status_tx.subscribe()
    }

    pub fn status_watch(&self) -> watch::Receiver<DeviceStatus> {
        self.inner.status.subscribe()
    }

    pub fn data_stream(&self) -> BroadcastStream<Arc<DataPoint>> {
        BroadcastStream::new(self.subscribe_data())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start the device. A no-op when a worker is already alive.
    ///
    /// A worker that previously faulted is joined and cleaned up first.
    /// If `initialize` fails, the error is returned and no worker is
    /// spawned.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if let Some(worker) = lifecycle.as_ref() {
            if !worker.handle.is_finished() {
                debug!(device = %self.inner.name, "start ignored, already running");
                return Ok(());
            }
        }
        if let Some(stale) = lifecycle.take() {
            debug!(device = %self.inner.name, "reaping finished worker before restart");
            self.inner.shutdown_worker(stale).await;
        }

        let ctx = DeviceContext {
            name: Arc::clone(&self.inner.name),
            config: self.inner.config.load_full(),
            cancel: CancellationToken::new(),
            data_tx: self.inner.data_tx.clone(),
        };

        if let Err(e) = self.inner.runtime.initialize(&ctx).await {
            warn!(
                device = %self.inner.name,
                code = %e.code(),
                error = %e,
                "device failed to initialize"
            );
            return Err(e);
        }

        self.inner.running.store(true, Ordering::Release);
        self.inner.set_status(DeviceStatus::Online);

        let inner = Arc::clone(&self.inner);
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(inner.runtime.run(run_ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!(device = %inner.name, "run loop exited"),
                Ok(Err(e)) => {
                    error!(device = %inner.name, code = %e.code(), error = %e, "run loop failed");
                    inner.set_status(DeviceStatus::Error);
                }
                Err(panic) => {
                    error!(
                        device = %inner.name,
                        panic = panic_message(panic.as_ref()),
                        "run loop panicked"
                    );
                    inner.set_status(DeviceStatus::Error);
                }
            }
            inner.running.store(false, Ordering::Release);
        });

        *lifecycle = Some(Worker { ctx, handle });
        info!(device = %self.inner.name, kind = self.inner.runtime.label(), "device started");
        Ok(())
    }

    /// Stop the device. A no-op when there is no worker.
    ///
    /// Returns only after the worker has terminated and cleanup has run.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(worker) = lifecycle.take() else {
            return;
        };
        self.inner.shutdown_worker(worker).await;
        self.inner.set_status(DeviceStatus::Offline);
        info!(device = %self.inner.name, "device stopped");
    }

    /// Stop, wait for the configured grace period, start again.
    pub async fn reset(&self) -> Result<(), CoreError> {
        self.stop().await;
        tokio::time::sleep(self.inner.config.load().reset_grace).await;
        self.start().await
    }

    /// Put the device into maintenance. Only meaningful while stopped;
    /// a subsequent start moves it back to Online.
    pub async fn enter_maintenance(&self) -> Result<(), CoreError> {
        let lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(CoreError::Validation {
                message: format!("device '{}' must be stopped first", self.inner.name),
            });
        }
        self.inner.set_status(DeviceStatus::Maintenance);
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.runtime.label())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl DeviceInner {
    /// Publish a status change. Dedup and event ordering both happen
    /// inside the watch sender's write lock.
    fn set_status(&self, next: DeviceStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            let previous = std::mem::replace(current, next);
            debug!(device = %self.name, from = %previous, to = %next, "status changed");
            let _ = self.status_tx.send(StatusChange {
                device: self.name.to_string(),
                previous,
                current: next,
            });
            true
        });
    }

    async fn shutdown_worker(&self, worker: Worker) {
        worker.ctx.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!(device = %self.name, error = %e, "worker task did not join cleanly");
        }
        if let Err(e) = self.runtime.cleanup(&worker.ctx).await {
            warn!(device = %self.name, error = %e, "cleanup failed");
        }
        self.running.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
