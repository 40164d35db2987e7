//! Configuration for fieldsim.
//!
//! TOML device profiles layered with `FIELDSIM_` environment overrides,
//! validation, and translation into `fieldsim_core` devices and
//! collector settings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fieldsim_core::{
    CollectorConfig, DataType, Device, DeviceCollector, DeviceConfig, DeviceKind, DriftSimulator,
    PolledRuntime, Register,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorSettings,

    /// Device profiles, one `[[devices]]` table each.
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CollectorSettings {
    /// Monitor scan period, e.g. "1s".
    #[serde(default = "default_interval")]
    pub monitor_interval: String,

    /// Monitor ticks between summary log lines.
    #[serde(default = "default_summary_every")]
    pub summary_every: u64,

    /// Start every enabled device when the collector starts.
    #[serde(default = "default_true")]
    pub start_devices: bool,

    /// Stop every device when the collector stops.
    #[serde(default = "default_true")]
    pub stop_devices: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            monitor_interval: default_interval(),
            summary_every: default_summary_every(),
            start_devices: true,
            stop_devices: true,
        }
    }
}

/// Which runtime a profile builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKindName {
    Polled,
    Broadcast,
}

/// A named device profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub name: String,

    pub kind: DeviceKindName,

    #[serde(default = "default_address")]
    pub address: String,

    pub port: u16,

    /// Tick period, e.g. "500ms" or "2s".
    #[serde(default = "default_interval")]
    pub update_interval: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Client limit for broadcast devices.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Pause between stop and start on reset.
    #[serde(default = "default_interval")]
    pub reset_grace: String,

    /// Register table for polled devices. Omit for the standard table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registers: Option<Vec<RegisterProfile>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegisterProfile {
    pub address: u16,
    pub data_type: DataType,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub initial: f64,
}

fn default_interval() -> String {
    "1s".into()
}
fn default_summary_every() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_address() -> String {
    "127.0.0.1".into()
}
fn default_max_clients() -> usize {
    64
}

impl Config {
    /// The two-device setup written by `config init`: a polled device on
    /// 502 ticking every 2s and a broadcast device on 8080 every 1s.
    pub fn starter() -> Self {
        Self {
            collector: CollectorSettings::default(),
            devices: vec![
                DeviceProfile {
                    name: "plc-1".into(),
                    kind: DeviceKindName::Polled,
                    address: default_address(),
                    port: 502,
                    update_interval: "2s".into(),
                    enabled: true,
                    max_clients: default_max_clients(),
                    reset_grace: default_interval(),
                    registers: None,
                },
                DeviceProfile {
                    name: "sock-1".into(),
                    kind: DeviceKindName::Broadcast,
                    address: default_address(),
                    port: 8080,
                    update_interval: "1s".into(),
                    enabled: true,
                    max_clients: default_max_clients(),
                    reset_grace: default_interval(),
                    registers: None,
                },
            ],
        }
    }

    /// Check every profile. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_interval("collector.monitor_interval", &self.collector.monitor_interval)?;

        let mut seen = HashSet::new();
        for (idx, profile) in self.devices.iter().enumerate() {
            if profile.name.trim().is_empty() {
                return Err(invalid(format!("devices[{idx}].name"), "must not be empty"));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(invalid(
                    format!("devices[{idx}].name"),
                    format!("duplicate device name '{}'", profile.name),
                ));
            }
            device_config(profile)?;
            if let Some(registers) = &profile.registers {
                registers_for(profile, registers)?;
            }
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "fieldsim", "fieldsim").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fieldsim");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate the config from `path` plus `FIELDSIM_*` env vars.
///
/// Nested keys use a double underscore:
/// `FIELDSIM_COLLECTOR__MONITOR_INTERVAL=2s`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FIELDSIM_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    debug!(path = %path.display(), devices = config.devices.len(), "config loaded");
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core types ───────────────────────────────────────

fn parse_interval(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let duration =
        humantime::parse_duration(raw).map_err(|e| invalid(field, format!("'{raw}': {e}")))?;
    if duration.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(duration)
}

/// Collector settings as core configuration.
pub fn collector_config(settings: &CollectorSettings) -> Result<CollectorConfig, ConfigError> {
    Ok(CollectorConfig {
        monitor_interval: parse_interval("collector.monitor_interval", &settings.monitor_interval)?,
        summary_every: settings.summary_every,
    })
}

/// A profile's runtime configuration.
pub fn device_config(profile: &DeviceProfile) -> Result<DeviceConfig, ConfigError> {
    let field = |name: &str| format!("{}.{name}", profile.name);
    if profile.max_clients == 0 {
        return Err(invalid(field("max_clients"), "must be at least 1"));
    }
    Ok(DeviceConfig {
        name: profile.name.clone(),
        address: profile.address.clone(),
        port: profile.port,
        update_interval: parse_interval(&field("update_interval"), &profile.update_interval)?,
        enabled: profile.enabled,
        max_clients: profile.max_clients,
        reset_grace: humantime::parse_duration(&profile.reset_grace)
            .map_err(|e| invalid(field("reset_grace"), e.to_string()))?,
    })
}

fn registers_for(
    profile: &DeviceProfile,
    registers: &[RegisterProfile],
) -> Result<Vec<Register>, ConfigError> {
    let mut addresses = HashSet::new();
    registers
        .iter()
        .map(|r| {
            let field = format!("{}.registers[{}]", profile.name, r.address);
            if r.min > r.max {
                return Err(invalid(field, format!("min {} exceeds max {}", r.min, r.max)));
            }
            if !addresses.insert(r.address) {
                return Err(invalid(field, "duplicate register address"));
            }
            Register::new(
                r.address,
                r.data_type,
                r.name.clone(),
                r.unit.clone(),
                (r.min, r.max),
                r.initial,
            )
            .map_err(|e| invalid(field, e.to_string()))
        })
        .collect()
}

/// Build a device from its profile.
pub fn profile_to_device(profile: &DeviceProfile) -> Result<Device, ConfigError> {
    let config = device_config(profile)?;
    let device = match (profile.kind, &profile.registers) {
        (DeviceKindName::Polled, Some(registers)) => {
            let registers = registers_for(profile, registers)?;
            let runtime = PolledRuntime::new(registers, DriftSimulator::new());
            Device::new(config, DeviceKind::Polled(runtime))
        }
        (DeviceKindName::Polled, None) => Device::polled(config),
        (DeviceKindName::Broadcast, _) => Device::broadcast(config),
    };
    Ok(device)
}

/// A collector with every configured device registered (not started).
pub async fn build_collector(cfg: &Config) -> Result<DeviceCollector, ConfigError> {
    cfg.validate()?;
    let collector = DeviceCollector::new(collector_config(&cfg.collector)?);
    for profile in &cfg.devices {
        collector.add_device(profile_to_device(profile)?).await;
    }
    Ok(collector)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn starter_config_is_valid() {
        Config::starter().validate().unwrap();
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = Config::starter();
        cfg.devices[0].update_interval = "0s".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("plc-1.update_interval"), "{err}");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut cfg = Config::starter();
        cfg.devices[1].name = "plc-1".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Validation { reason, .. }) if reason.contains("duplicate")
        ));
    }

    #[test]
    fn inverted_register_bounds_are_rejected() {
        let mut cfg = Config::starter();
        cfg.devices[0].registers = Some(vec![RegisterProfile {
            address: 1,
            data_type: DataType::Custom,
            name: "x".into(),
            unit: String::new(),
            min: 5.0,
            max: 1.0,
            initial: 2.0,
        }]);
        assert!(cfg.validate().is_err());
    }
}
