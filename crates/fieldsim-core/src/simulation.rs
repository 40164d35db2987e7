// ── Value synthesis ──
//
// Register values are produced by a pluggable simulator. The runtime
// clamps whatever comes back, so implementations only need to be
// plausible, never exact.

use std::f64::consts::PI;

use chrono::{Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{DataType, Register};

/// Produces the next value for a register on a given tick.
pub trait ValueSimulator: Send {
    /// `tick` counts run-loop iterations since the device started, from 1.
    fn next_value(&mut self, register: &Register, tick: u64) -> f64;
}

impl<F> ValueSimulator for F
where
    F: FnMut(&Register, u64) -> f64 + Send,
{
    fn next_value(&mut self, register: &Register, tick: u64) -> f64 {
        self(register, tick)
    }
}

/// Default simulator: noise around the register's seed value plus a slow
/// periodic component per data type.
pub struct DriftSimulator {
    rng: StdRng,
}

impl DriftSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic noise, for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform noise in `[-amplitude / 2, amplitude / 2)`.
    fn noise(&mut self, amplitude: f64) -> f64 {
        amplitude * (self.rng.random::<f64>() - 0.5)
    }
}

impl Default for DriftSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueSimulator for DriftSimulator {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    fn next_value(&mut self, register: &Register, tick: u64) -> f64 {
        let base = register.initial_value;
        let t = tick as f64;
        match register.data_type {
            DataType::Temperature => {
                let hour = f64::from(Local::now().hour());
                base + self.noise(2.0) + 3.0 * ((hour - 6.0) * PI / 12.0).sin()
            }
            DataType::Pressure => base + self.noise(0.05) + 0.02 * (t * 0.1).sin(),
            DataType::Flow => base + self.noise(10.0) + 5.0 * (t * 0.01).sin(),
            DataType::Status => {
                if tick % 100 != 0 {
                    return register.current_value;
                }
                if self.rng.random::<f64>() < 0.9 {
                    0.0
                } else {
                    (self.rng.random::<f64>() * 4.0).floor()
                }
            }
            DataType::Custom => {
                let span = register.max_value - register.min_value;
                register.current_value + self.noise(span * 0.05)
            }
        }
    }
}
