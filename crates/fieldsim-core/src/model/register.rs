// ── Register table entries ──

use serde::{Deserialize, Serialize};

use super::data::DataType;
use crate::error::CoreError;

/// A bounded value slot on a polled device.
///
/// `min_value` and `max_value` never change after construction;
/// `current_value` is always kept inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub address: u16,
    pub data_type: DataType,
    pub name: String,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub initial_value: f64,
    pub current_value: f64,
}

impl Register {
    /// Build a register. Bounds must be finite with `min <= max`; the
    /// initial value is clamped into them.
    pub fn new(
        address: u16,
        data_type: DataType,
        name: impl Into<String>,
        unit: impl Into<String>,
        bounds: (f64, f64),
        initial_value: f64,
    ) -> Result<Self, CoreError> {
        let (min, max) = bounds;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(CoreError::Validation {
                message: format!("register {address}: invalid bounds [{min}, {max}]"),
            });
        }
        Ok(Self::bounded(address, data_type, name, unit, bounds, initial_value))
    }

    fn bounded(
        address: u16,
        data_type: DataType,
        name: impl Into<String>,
        unit: impl Into<String>,
        (min_value, max_value): (f64, f64),
        initial_value: f64,
    ) -> Self {
        let mut register = Self {
            address,
            data_type,
            name: name.into(),
            unit: unit.into(),
            min_value,
            max_value,
            initial_value,
            current_value: initial_value,
        };
        register.current_value = register.clamp(initial_value);
        register
    }

    /// Clamp `value` into this register's bounds. NaN collapses to `min_value`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min_value;
        }
        value.max(self.min_value).min(self.max_value)
    }

    /// Store a clamped value and return what was stored.
    pub fn set(&mut self, value: f64) -> f64 {
        self.current_value = self.clamp(value);
        self.current_value
    }

    /// Put `current_value` back to the (clamped) initial value.
    pub fn reseed(&mut self) {
        self.current_value = self.clamp(self.initial_value);
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}

/// The register table a polled device starts with when none is supplied.
pub fn default_registers() -> Vec<Register> {
    vec![
        Register::bounded(0, DataType::Temperature, "temperature", "°C", (15.0, 35.0), 25.0),
        Register::bounded(2, DataType::Pressure, "pressure", "MPa", (0.8, 1.2), 1.0),
        Register::bounded(4, DataType::Flow, "flow", "L/min", (80.0, 120.0), 100.0),
        Register::bounded(6, DataType::Status, "status", "code", (0.0, 4.0), 0.0),
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn set_clamps_into_bounds() {
        let mut reg = Register::new(1, DataType::Custom, "r", "u", (0.0, 10.0), 5.0).unwrap();
        assert!((reg.set(42.0) - 10.0).abs() < f64::EPSILON);
        assert!((reg.set(-3.0) - 0.0).abs() < f64::EPSILON);
        assert!((reg.set(f64::NAN) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_seed_is_clamped_on_construction() {
        let reg = Register::new(1, DataType::Custom, "r", "u", (0.0, 10.0), 50.0).unwrap();
        assert!(reg.contains(reg.current_value));
        assert!((reg.current_value - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inverted_or_non_finite_bounds_are_rejected() {
        assert!(Register::new(1, DataType::Custom, "r", "u", (5.0, 1.0), 2.0).is_err());
        assert!(Register::new(1, DataType::Custom, "r", "u", (f64::NAN, 1.0), 0.0).is_err());
        let flat = Register::new(1, DataType::Custom, "r", "u", (3.0, 3.0), 9.0).unwrap();
        assert!((flat.current_value - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_table_is_well_formed() {
        for reg in default_registers() {
            assert!(reg.min_value <= reg.max_value);
            assert!(reg.contains(reg.current_value));
        }
    }
}
