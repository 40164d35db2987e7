//! Register-polling device: bounds, ordering, and emission shape.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::time::timeout;

use fieldsim_core::{
    CoreError, DataType, Device, DeviceConfig, DeviceKind, DeviceStatus, DriftSimulator,
    ErrorCode, PolledRuntime, Register,
};

const WAIT: Duration = Duration::from_secs(5);

fn config(name: &str) -> DeviceConfig {
    DeviceConfig::new(name, "127.0.0.1", 1502).with_update_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn value_stays_in_bounds_after_first_tick() {
    let register = Register::new(3, DataType::Custom, "level", "u", (0.0, 10.0), 5.0).unwrap();
    let device = Device::new(
        config("bounded"),
        DeviceKind::Polled(PolledRuntime::new([register], DriftSimulator::seeded(5))),
    );
    let mut data = device.subscribe_data();

    device.start().await.unwrap();
    let first = timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert!((0.0..=10.0).contains(&first.value));

    let stored = device.as_polled().unwrap().register_value(3).await.unwrap();
    assert!((0.0..=10.0).contains(&stored));
    device.stop().await;
}

#[tokio::test]
async fn simulator_output_is_clamped_on_every_tick() {
    let wild = |_: &Register, tick: u64| if tick % 2 == 0 { 1e9 } else { -1e9 };
    let register = Register::new(1, DataType::Pressure, "p", "MPa", (0.8, 1.2), 1.0).unwrap();
    let device = Device::new(
        config("wild"),
        DeviceKind::Polled(PolledRuntime::new([register], wild)),
    );
    let mut data = device.subscribe_data();

    device.start().await.unwrap();
    for _ in 0..20 {
        let point = timeout(WAIT, data.recv()).await.unwrap().unwrap();
        assert!(
            (0.8..=1.2).contains(&point.value),
            "value {} escaped bounds",
            point.value
        );
    }
    device.stop().await;
}

#[tokio::test]
async fn one_point_per_register_in_address_order() {
    let registers = [
        Register::new(9, DataType::Flow, "flow", "L/min", (80.0, 120.0), 100.0).unwrap(),
        Register::new(1, DataType::Temperature, "temp", "°C", (15.0, 35.0), 25.0).unwrap(),
    ];
    let device = Device::new(
        config("ordered"),
        DeviceKind::Polled(PolledRuntime::new(registers, DriftSimulator::seeded(9))),
    );
    let mut data = device.subscribe_data();

    device.start().await.unwrap();
    let mut kinds = Vec::new();
    for _ in 0..6 {
        kinds.push(timeout(WAIT, data.recv()).await.unwrap().unwrap().data_type);
    }
    device.stop().await;

    assert_eq!(
        kinds,
        vec![
            DataType::Temperature,
            DataType::Flow,
            DataType::Temperature,
            DataType::Flow,
            DataType::Temperature,
            DataType::Flow,
        ]
    );
}

#[tokio::test]
async fn default_device_emits_all_four_measurements() {
    let device = Device::polled(config("plc-1"));
    let mut data = device.subscribe_data();

    device.start().await.unwrap();
    let mut points = Vec::new();
    for _ in 0..4 {
        points.push(timeout(WAIT, data.recv()).await.unwrap().unwrap());
    }
    device.stop().await;

    let units: Vec<&str> = points.iter().map(|p| p.unit.as_str()).collect();
    assert_eq!(units, vec!["°C", "MPa", "L/min", "code"]);
    assert!(points.iter().all(|p| p.source == "plc-1"));
    assert_eq!(
        device.as_polled().unwrap().endpoint(),
        None,
        "endpoint is released on stop"
    );
}

#[tokio::test]
async fn start_reseeds_registers() {
    let device = Device::polled(config("reseed"));
    let runtime = device.as_polled().unwrap();
    runtime.set_register_value(0, 34.0).await.unwrap();

    device.start().await.unwrap();
    assert!(runtime.endpoint().is_some());
    device.stop().await;

    let registers = runtime.registers().await;
    assert!(registers.iter().all(|r| r.contains(r.current_value)));
}

#[tokio::test]
async fn unresolvable_endpoint_fails_start_without_worker() {
    let device = Device::polled(DeviceConfig::new("nowhere", "not a host", 1502));
    let mut events = device.subscribe_status();
    let mut data = device.subscribe_data();

    let err = device.start().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    assert!(!device.is_running());
    assert_eq!(device.status(), DeviceStatus::Offline);
    assert!(device.as_polled().unwrap().endpoint().is_none());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(events.try_recv().is_err());
    assert!(data.try_recv().is_err());
}

#[tokio::test]
async fn register_table_is_fixed_while_running() {
    let device = Device::polled(config("fixed"));
    let runtime = device.as_polled().unwrap();
    let extra = || Register::new(10, DataType::Custom, "extra", "", (0.0, 1.0), 0.5).unwrap();

    device.start().await.unwrap();
    let err = runtime.add_register(extra()).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(runtime.register_value(10).await.is_none());
    device.stop().await;

    runtime.add_register(extra()).await.unwrap();
    assert_eq!(runtime.register_value(10).await, Some(0.5));
}
