//! `fieldsim devices`: the configured device table.

use std::path::Path;

use tabled::{Table, Tabled, settings::Style};

use fieldsim_config::{DeviceKindName, DeviceProfile, load_config};

use crate::error::CliError;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Enabled")]
    enabled: &'static str,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl From<&DeviceProfile> for DeviceRow {
    fn from(p: &DeviceProfile) -> Self {
        let (kind, detail) = match p.kind {
            DeviceKindName::Polled => (
                "polled",
                p.registers.as_ref().map_or_else(
                    || "default registers".to_owned(),
                    |r| format!("{} registers", r.len()),
                ),
            ),
            DeviceKindName::Broadcast => ("broadcast", format!("max {} clients", p.max_clients)),
        };
        Self {
            name: p.name.clone(),
            kind,
            endpoint: format!("{}:{}", p.address, p.port),
            interval: p.update_interval.clone(),
            enabled: if p.enabled { "yes" } else { "no" },
            detail,
        }
    }
}

pub fn handle(path: &Path) -> Result<(), CliError> {
    let cfg = load_config(path).map_err(|e| CliError::config(path, e))?;
    if cfg.devices.is_empty() {
        return Err(CliError::NoDevices {
            path: path.display().to_string(),
        });
    }

    let rows: Vec<DeviceRow> = cfg.devices.iter().map(DeviceRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
