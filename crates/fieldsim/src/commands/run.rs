//! `fieldsim run`: drive the configured devices until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fieldsim_config::{build_collector, load_config};
use fieldsim_core::{
    DataSink, DeviceCollector, JsonLinesSink, StartMode, StopMode, TracingSink, spawn_sink_pump,
};

use crate::cli::RunArgs;
use crate::error::CliError;

pub async fn handle(args: RunArgs, path: &Path) -> Result<(), CliError> {
    let cfg = load_config(path).map_err(|e| CliError::config(path, e))?;
    if cfg.devices.is_empty() {
        return Err(CliError::NoDevices {
            path: path.display().to_string(),
        });
    }
    let collector = build_collector(&cfg)
        .await
        .map_err(|e| CliError::config(path, e))?;

    let sink: Arc<dyn DataSink> = if args.json {
        Arc::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Arc::new(TracingSink)
    };

    let cancel = CancellationToken::new();
    let enabled: Vec<&str> = cfg
        .devices
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.name.as_str())
        .collect();
    let pumps: Vec<_> = enabled
        .iter()
        .filter_map(|name| collector.device(name))
        .map(|device| spawn_sink_pump(&device, Arc::clone(&sink), cancel.clone()))
        .collect();

    if cfg.collector.start_devices {
        collector.start_with(StartMode::StartDevices).await;
        if !enabled.is_empty() && online_count(&collector) == 0 {
            collector.stop_with(StopMode::Cascade).await;
            cancel.cancel();
            return Err(CliError::NothingRunning {
                enabled: enabled.len(),
            });
        }
    } else {
        collector.start_with(StartMode::MonitorOnly).await;
    }
    info!(
        devices = collector.device_count(),
        online = online_count(&collector),
        "fieldsim running"
    );

    wait_for_shutdown(args.run_for).await?;

    let stop_mode = if cfg.collector.stop_devices {
        StopMode::Cascade
    } else {
        StopMode::MonitorOnly
    };
    collector.stop_with(stop_mode).await;

    cancel.cancel();
    for pump in pumps {
        if let Err(e) = pump.await {
            warn!(error = %e, "sink pump did not join cleanly");
        }
    }
    info!("fieldsim stopped");
    Ok(())
}

fn online_count(collector: &DeviceCollector) -> usize {
    collector
        .statuses()
        .iter()
        .filter(|(_, status)| status.is_online())
        .count()
}

async fn wait_for_shutdown(run_for: Option<Duration>) -> Result<(), CliError> {
    match run_for {
        Some(limit) => {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => signal?,
                () = tokio::time::sleep(limit) => info!(?limit, "run duration elapsed"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupt received");
        }
    }
    Ok(())
}
