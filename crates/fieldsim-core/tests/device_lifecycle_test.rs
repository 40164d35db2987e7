//! Lifecycle tests for `Device`: idempotent start/stop, status event
//! dedup, initialize failures, run-loop faults, and reset.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

use fieldsim_core::{
    CoreError, DataType, Device, DeviceConfig, DeviceKind, DeviceStatus, DriftSimulator,
    ErrorCode, PolledRuntime, Register, StatusChange,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(name: &str) -> DeviceConfig {
    DeviceConfig::new(name, "127.0.0.1", 0)
        .with_update_interval(Duration::from_millis(10))
        .with_reset_grace(Duration::from_millis(10))
}

fn single_register_device(name: &str) -> Device {
    let register = Register::new(1, DataType::Custom, "level", "u", (0.0, 10.0), 5.0).unwrap();
    let runtime = PolledRuntime::new([register], DriftSimulator::seeded(11));
    Device::new(fast_config(name), DeviceKind::Polled(runtime))
}

async fn wait_for_status(device: &Device, target: DeviceStatus) {
    let mut rx = device.status_watch();
    timeout(WAIT, rx.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for status")
        .unwrap();
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<StatusChange>) -> Vec<(DeviceStatus, DeviceStatus)> {
    let mut seen = Vec::new();
    while let Ok(change) = rx.try_recv() {
        seen.push((change.previous, change.current));
    }
    seen
}

// ── Start / stop ────────────────────────────────────────────────────

#[tokio::test]
async fn start_twice_is_equivalent_to_start_once() {
    let device = single_register_device("twice");
    let mut events = device.subscribe_status();

    device.start().await.unwrap();
    device.start().await.unwrap();

    assert!(device.is_running());
    assert_eq!(device.status(), DeviceStatus::Online);
    assert_eq!(
        drain(&mut events),
        vec![(DeviceStatus::Offline, DeviceStatus::Online)]
    );

    device.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_only_reports_real_transitions() {
    let device = single_register_device("idem");
    let mut events = device.subscribe_status();

    device.stop().await;
    device.start().await.unwrap();
    device.stop().await;
    device.stop().await;

    assert!(!device.is_running());
    assert_eq!(device.status(), DeviceStatus::Offline);
    assert_eq!(
        drain(&mut events),
        vec![
            (DeviceStatus::Offline, DeviceStatus::Online),
            (DeviceStatus::Online, DeviceStatus::Offline),
        ]
    );
}

#[tokio::test]
async fn no_data_after_stop_returns() {
    let device = single_register_device("quiet");
    let mut data = device.subscribe_data();

    device.start().await.unwrap();
    timeout(WAIT, data.recv()).await.unwrap().unwrap();
    device.stop().await;

    while data.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(data.try_recv(), Err(TryRecvError::Empty)));
}

// ── Initialize failure ──────────────────────────────────────────────

#[tokio::test]
async fn bind_failure_returns_connection_failed_and_spawns_nothing() {
    // TEST-NET-3 is never assigned to a local interface.
    let device = Device::broadcast(DeviceConfig::new("unbindable", "203.0.113.7", 0));
    let mut events = device.subscribe_status();

    let err = device.start().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    assert!(!device.is_running());
    assert_eq!(device.status(), DeviceStatus::Offline);
    assert!(drain(&mut events).is_empty());

    // Nothing to stop.
    device.stop().await;
    assert_eq!(device.status(), DeviceStatus::Offline);
}

// ── Run-loop faults ─────────────────────────────────────────────────

#[tokio::test]
async fn run_loop_panic_becomes_error_and_device_can_restart() {
    let fired = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&fired);
    let simulator = move |reg: &Register, tick: u64| {
        assert!(!(tick == 2 && !trip.swap(true, Ordering::SeqCst)), "sensor fault");
        reg.current_value
    };
    let register = Register::new(1, DataType::Custom, "level", "u", (0.0, 10.0), 5.0).unwrap();
    let device = Device::new(
        fast_config("faulty"),
        DeviceKind::Polled(PolledRuntime::new([register], simulator)),
    );
    let mut events = device.subscribe_status();

    device.start().await.unwrap();
    wait_for_status(&device, DeviceStatus::Error).await;
    assert!(fired.load(Ordering::SeqCst));

    // Not retried automatically.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(device.status(), DeviceStatus::Error);
    assert!(!device.is_running());

    device.start().await.unwrap();
    assert_eq!(device.status(), DeviceStatus::Online);
    assert!(device.is_running());

    device.stop().await;
    assert_eq!(
        drain(&mut events),
        vec![
            (DeviceStatus::Offline, DeviceStatus::Online),
            (DeviceStatus::Online, DeviceStatus::Error),
            (DeviceStatus::Error, DeviceStatus::Online),
            (DeviceStatus::Online, DeviceStatus::Offline),
        ]
    );
}

#[tokio::test]
async fn stop_moves_error_to_offline() {
    let simulator = |_: &Register, _: u64| -> f64 { panic!("always broken") };
    let register = Register::new(1, DataType::Custom, "level", "u", (0.0, 10.0), 5.0).unwrap();
    let device = Device::new(
        fast_config("broken"),
        DeviceKind::Polled(PolledRuntime::new([register], simulator)),
    );

    device.start().await.unwrap();
    wait_for_status(&device, DeviceStatus::Error).await;
    device.stop().await;
    assert_eq!(device.status(), DeviceStatus::Offline);
}

// ── Reset ───────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_cycles_through_offline() {
    let device = single_register_device("reset");
    device.start().await.unwrap();
    let mut events = device.subscribe_status();

    device.reset().await.unwrap();

    assert!(device.is_running());
    assert_eq!(
        drain(&mut events),
        vec![
            (DeviceStatus::Online, DeviceStatus::Offline),
            (DeviceStatus::Offline, DeviceStatus::Online),
        ]
    );
    device.stop().await;
}

#[tokio::test]
async fn config_changes_apply_on_next_start() {
    let device = single_register_device("cfg");
    device.start().await.unwrap();

    let slower = fast_config("cfg").with_update_interval(Duration::from_secs(30));
    device.update_config(slower).unwrap();
    assert_eq!(device.config().update_interval, Duration::from_secs(30));

    device.stop().await;
    device.start().await.unwrap();
    assert!(device.is_running());
    device.stop().await;
}
