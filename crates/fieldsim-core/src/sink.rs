// ── Data sinks ──
//
// Consumers of a device's data and status channels. Sinks are best
// effort: a `false` return is logged and otherwise ignored.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::model::{DataPoint, DeviceStatus};

/// Persistence collaborator for emitted data.
///
/// Calls may block; the pump runs them on tokio's blocking pool.
pub trait DataSink: Send + Sync {
    fn insert_data_point(&self, point: &DataPoint) -> bool;

    fn insert_device_status(&self, device: &str, status: DeviceStatus) -> bool;
}

// ── TracingSink ──────────────────────────────────────────────────

/// Logs every point and status change through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DataSink for TracingSink {
    fn insert_data_point(&self, point: &DataPoint) -> bool {
        info!(
            device = %point.source,
            kind = %point.data_type,
            value = point.value,
            unit = %point.unit,
            "data point"
        );
        true
    }

    fn insert_device_status(&self, device: &str, status: DeviceStatus) -> bool {
        info!(device, %status, "device status");
        true
    }
}

// ── JsonLinesSink ────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    DataPoint(&'a DataPoint),
    Status { device: &'a str, status: DeviceStatus },
}

/// Writes one JSON object per line to any `Write` target. Each record is
/// flushed with a blocking write.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner().ok()
    }

    fn write(&self, record: &Record<'_>) -> bool {
        let Ok(mut writer) = self.writer.lock() else {
            return false;
        };
        let written = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        match written {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "json sink write failed");
                false
            }
        }
    }
}

impl<W: Write + Send> DataSink for JsonLinesSink<W> {
    fn insert_data_point(&self, point: &DataPoint) -> bool {
        self.write(&Record::DataPoint(point))
    }

    fn insert_device_status(&self, device: &str, status: DeviceStatus) -> bool {
        self.write(&Record::Status { device, status })
    }
}

// ── Pump ─────────────────────────────────────────────────────────

/// Forward a device's data points and status transitions into `sink`
/// until `cancel` fires. Lagging behind the data channel skips points
/// and logs how many were lost.
pub fn spawn_sink_pump(
    device: &Device,
    sink: Arc<dyn DataSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let name = device.name().to_owned();
    let mut data = device.data_stream();
    let mut status = device.subscribe_status();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                change = status.recv() => match change {
                    Ok(change) => {
                        let delivered = deliver(&sink, move |sink| {
                            sink.insert_device_status(&change.device, change.current)
                        });
                        if !delivered.await {
                            debug!(device = %name, "sink rejected status");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(device = %name, skipped, "status events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                point = data.next() => match point {
                    Some(Ok(point)) => {
                        if !deliver(&sink, move |sink| sink.insert_data_point(&point)).await {
                            debug!(device = %name, "sink rejected data point");
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(device = %name, skipped, "sink lagging, data points dropped");
                    }
                    None => break,
                },
            }
        }
        debug!(device = %name, "sink pump stopped");
    })
}

/// Run one sink call off the async workers. A panicking sink counts as a
/// rejection.
async fn deliver<F>(sink: &Arc<dyn DataSink>, call: F) -> bool
where
    F: FnOnce(&dyn DataSink) -> bool + Send + 'static,
{
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || call(sink.as_ref())).await {
        Ok(delivered) => delivered,
        Err(e) => {
            warn!(error = %e, "sink call failed");
            false
        }
    }
}
