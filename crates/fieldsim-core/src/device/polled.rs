// ── Register-polling device ──
//
// Owns a register table. Every tick recomputes each register through the
// simulator, clamps it into bounds, and emits one data point per register
// in ascending address order.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{DeviceContext, DeviceRuntime};
use crate::error::CoreError;
use crate::model::{DataPoint, Register, default_registers};
use crate::simulation::{DriftSimulator, ValueSimulator};

/// Ticks between simulated request-handling log lines.
const REQUEST_LOG_EVERY: u64 = 10;
const MIN_TICK: Duration = Duration::from_millis(1);

pub struct PolledRuntime {
    registers: Mutex<BTreeMap<u16, Register>>,
    simulator: Mutex<Box<dyn ValueSimulator>>,
    endpoint: ArcSwapOption<SocketAddr>,
    ticks: AtomicU64,
}

impl Default for PolledRuntime {
    fn default() -> Self {
        Self::new(default_registers(), DriftSimulator::new())
    }
}

impl PolledRuntime {
    pub fn new(
        registers: impl IntoIterator<Item = Register>,
        simulator: impl ValueSimulator + 'static,
    ) -> Self {
        Self {
            registers: Mutex::new(registers.into_iter().map(|r| (r.address, r)).collect()),
            simulator: Mutex::new(Box::new(simulator)),
            endpoint: ArcSwapOption::empty(),
            ticks: AtomicU64::new(0),
        }
    }

    /// Add or replace a register. Its current value is clamped into bounds.
    ///
    /// Only allowed while the device is stopped: register bounds are fixed
    /// for as long as the endpoint is open.
    pub async fn add_register(&self, mut register: Register) -> Result<(), CoreError> {
        let mut registers = self.registers.lock().await;
        if self.endpoint.load().is_some() {
            return Err(CoreError::Validation {
                message: format!(
                    "register {} cannot be added while the device is running",
                    register.address
                ),
            });
        }
        register.current_value = register.clamp(register.current_value);
        registers.insert(register.address, register);
        Ok(())
    }

    /// Overwrite a register's current value, clamped. Returns the stored value.
    pub async fn set_register_value(&self, address: u16, value: f64) -> Result<f64, CoreError> {
        let mut registers = self.registers.lock().await;
        let register = registers
            .get_mut(&address)
            .ok_or(CoreError::RegisterNotFound { address })?;
        Ok(register.set(value))
    }

    pub async fn register_value(&self, address: u16) -> Option<f64> {
        self.registers.lock().await.get(&address).map(|r| r.current_value)
    }

    /// Snapshot of the register table in address order.
    pub async fn registers(&self) -> Vec<Register> {
        self.registers.lock().await.values().cloned().collect()
    }

    /// The endpoint opened by the last successful initialize.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint.load().as_deref().copied()
    }

    /// Ticks completed since construction.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    async fn tick(&self, ctx: &DeviceContext, tick: u64) {
        let points: Vec<DataPoint> = {
            let mut registers = self.registers.lock().await;
            let mut simulator = self.simulator.lock().await;
            registers
                .values_mut()
                .map(|register| {
                    let next = simulator.next_value(register, tick);
                    let value = register.set(next);
                    ctx.point(register.data_type, value, register.unit.clone())
                })
                .collect()
        };

        for point in points {
            ctx.emit(point);
        }

        if tick % REQUEST_LOG_EVERY == 0 {
            debug!(device = ctx.name(), tick, "handled simulated register requests");
        }
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }
}

impl DeviceRuntime for PolledRuntime {
    async fn initialize(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        // Held until the endpoint is published so `add_register` sees a
        // consistent running state.
        let mut registers = self.registers.lock().await;
        for register in registers.values_mut() {
            register.reseed();
        }

        let endpoint = ctx.config().endpoint();
        let addr = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| CoreError::connection(&endpoint, e))?
            .next()
            .ok_or_else(|| CoreError::connection(&endpoint, "address did not resolve"))?;

        self.endpoint.store(Some(std::sync::Arc::new(addr)));
        drop(registers);
        info!(device = ctx.name(), %addr, "register endpoint open");
        Ok(())
    }

    async fn run(&self, ctx: DeviceContext) -> Result<(), CoreError> {
        let mut interval = tokio::time::interval(ctx.config().update_interval.max(MIN_TICK));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0_u64;

        loop {
            tokio::select! {
                biased;
                () = ctx.cancelled() => break,
                _ = interval.tick() => {
                    tick += 1;
                    self.tick(&ctx, tick).await;
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        if self.endpoint.swap(None).is_some() {
            info!(device = ctx.name(), "register endpoint closed");
        }
        Ok(())
    }
}
