//! Device pipeline integration test
//!
//! Drives simulated trainers, power meters and heart-rate straps through
//! discovery, classification, the local device registry and the rider
//! physics tick, all over SimBleNetwork.
//!
//! Run with:
//!   cargo test --test device_pipeline

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tourjs::ble::gatt::{
    CYCLING_POWER_MEASUREMENT, CYCLING_POWER_SERVICE, FTMS_CONTROL_POINT, FTMS_SERVICE,
    HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE, INDOOR_BIKE_DATA, KICKR_SERVICE,
    KICKR_WRITE_CHARACTERISTIC,
};
use tourjs::ble::session::SessionConfig;
use tourjs::ble::simulated::{SimBleNetwork, SimPeripheral, SimPeripheralSpec};
use tourjs::device::drivers::DriverOptions;
use tourjs::device::{
    DeviceError, DeviceFactory, DeviceFlags, DeviceState, LocalDevices, MetricKind,
    TelemetryRecorder,
};
use tourjs::physics::{ElevationMap, Rider, UserTypeFlags};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn factory(network: &Arc<SimBleNetwork>) -> DeviceFactory {
    DeviceFactory::new(
        Arc::new(network.create_central()),
        SessionConfig::default(),
        DriverOptions::default(),
    )
}

/// A smart trainer advertising both FTMS and the Cycling Power Service,
/// the way retail trainers do.
fn add_ftms_trainer(network: &Arc<SimBleNetwork>) -> SimPeripheral {
    network.add_peripheral(
        SimPeripheralSpec::new("Smart Trainer")
            .with_characteristic(FTMS_SERVICE, INDOOR_BIKE_DATA)
            .with_characteristic(FTMS_SERVICE, FTMS_CONTROL_POINT)
            .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT),
    )
}

/// Indoor Bike Data with instantaneous cadence and power, no speed.
fn indoor_bike_data(cadence_rpm: f64, watts: i16) -> Vec<u8> {
    let flags: u16 = 0x0001 | 0x0004 | 0x0040;
    let half_rpm = (cadence_rpm * 2.0) as u16;
    let mut payload = flags.to_le_bytes().to_vec();
    payload.extend_from_slice(&half_rpm.to_le_bytes());
    payload.extend_from_slice(&watts.to_le_bytes());
    payload
}

/// Let pump tasks drain their streams.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_trainer_power_reaches_rider() {
    let network = SimBleNetwork::new();
    let trainer = add_ftms_trainer(&network);

    let device = factory(&network).find_powermeter().await.unwrap();
    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(Arc::clone(&recorder));
    devices
        .set_local_user_device(Arc::clone(&device), DeviceFlags::ALL)
        .await;
    assert!(devices.is_local_user_device_valid());

    let delivered = trainer.notify(FTMS_SERVICE, INDOOR_BIKE_DATA, &indoor_bike_data(90.0, 250));
    assert_eq!(delivered, 1);
    settle().await;

    assert_eq!(recorder.last_power(), 250.0);
    assert_eq!(recorder.last_cadence(), Some(90.0));
    assert_eq!(recorder.last_hrm(), None);

    let start = Utc::now();
    let mut rider = Rider::new(
        "Local",
        75.0,
        250.0,
        UserTypeFlags::LOCAL,
        Arc::clone(&recorder),
        start,
    );
    let map = ElevationMap::flat(5000.0).unwrap();
    rider
        .tick(start + chrono::Duration::milliseconds(250), &map, &[])
        .unwrap();
    assert!(rider.speed() > 0.0);
    assert_eq!(rider.display().last_power, "250W");
}

#[tokio::test(start_paused = true)]
async fn test_trainer_commands_written_in_issue_order() {
    let network = SimBleNetwork::new();
    let trainer = add_ftms_trainer(&network);
    let device = factory(&network).find_powermeter().await.unwrap();

    let (erg, slope, resistance) = tokio::join!(
        device.update_erg(200.0),
        device.update_slope(5.0),
        device.update_resistance(40.0),
    );
    assert!(erg.unwrap());
    assert!(slope.unwrap());
    assert!(resistance.unwrap());

    let opcodes: Vec<u8> = trainer
        .writes()
        .iter()
        .filter(|w| w.characteristic == FTMS_CONTROL_POINT)
        .map(|w| w.payload[0])
        .collect();
    // Request control at startup, then the three commands.
    assert_eq!(opcodes, vec![0x00, 0x05, 0x11, 0x04]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_does_not_block_later_commands() {
    let network = SimBleNetwork::new();
    let trainer = add_ftms_trainer(&network);
    let device = factory(&network).find_powermeter().await.unwrap();

    trainer.fail_next_writes(1);
    let failed = device.update_erg(150.0).await;
    assert!(matches!(failed, Err(DeviceError::Transport(_))));

    assert!(device.update_erg(160.0).await.unwrap());
    let last = trainer.writes().last().cloned().unwrap();
    assert_eq!(last.payload, vec![0x05, 160, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_kickr_grade_sends_sim_mode_once() {
    let network = SimBleNetwork::new();
    let kickr = network.add_peripheral(
        SimPeripheralSpec::new("KICKR")
            .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
            .with_characteristic(KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC),
    );
    let device = factory(&network).find_powermeter().await.unwrap();

    device.update_slope(2.0).await.unwrap();
    device.update_slope(3.0).await.unwrap();

    let opcodes: Vec<u8> = kickr.writes().iter().map(|w| w.payload[0]).collect();
    assert_eq!(opcodes, vec![0x20, 0x43, 0x46, 0x46]);
}

#[tokio::test(start_paused = true)]
async fn test_power_meter_and_strap_share_one_recorder() {
    let network = SimBleNetwork::new();
    let meter = network.add_peripheral(
        SimPeripheralSpec::new("Crank")
            .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT),
    );
    let strap = network.add_peripheral(
        SimPeripheralSpec::new("Strap")
            .with_characteristic(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT),
    );

    let factory = factory(&network);
    let power = factory.find_powermeter().await.unwrap();
    let hrm = factory.find_hrm().await.unwrap();

    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(Arc::clone(&recorder));
    devices
        .set_local_user_device(Arc::clone(&power), DeviceFlags::ALL_BUT_HRM)
        .await;
    devices
        .set_local_user_device(Arc::clone(&hrm), DeviceFlags::HRM)
        .await;

    // Flags 0x0000, instantaneous power 180 W.
    meter.notify(
        CYCLING_POWER_SERVICE,
        CYCLING_POWER_MEASUREMENT,
        &[0x00, 0x00, 180, 0x00],
    );
    strap.notify(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT, &[0x00, 142]);
    settle().await;

    assert_eq!(recorder.last_power(), 180.0);
    assert_eq!(recorder.last_hrm(), Some(142.0));
    assert_eq!(
        devices.local_user_device(MetricKind::HeartRate).map(|d| d.name()),
        Some("Strap".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_marks_device_disconnected() {
    let network = SimBleNetwork::new();
    let trainer = add_ftms_trainer(&network);
    let device = factory(&network).find_powermeter().await.unwrap();

    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(recorder);
    devices
        .set_local_user_device(Arc::clone(&device), DeviceFlags::POWER)
        .await;
    assert!(devices.is_local_user_device_valid());

    trainer.drop_link();
    settle().await;

    assert_eq!(device.state(), DeviceState::Disconnected);
    assert!(!devices.is_local_user_device_valid());
    assert!(matches!(
        device.update_erg(100.0).await,
        Err(DeviceError::NotReady(DeviceState::Disconnected))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_replacing_power_device_disconnects_previous() {
    let network = SimBleNetwork::new();
    let first = add_ftms_trainer(&network);
    let factory = factory(&network);
    let old = factory.find_powermeter().await.unwrap();

    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(Arc::clone(&recorder));
    devices
        .set_local_user_device(Arc::clone(&old), DeviceFlags::ALL)
        .await;

    let replacement = tourjs::device::drivers::FakeDevice::spawn(Default::default());
    devices
        .set_local_user_device(replacement, DeviceFlags::ALL)
        .await;

    assert_eq!(old.state(), DeviceState::Disconnected);
    assert!(!first.is_connected());
    assert_eq!(
        devices
            .local_user_device(MetricKind::Power)
            .map(|d| d.type_description()),
        Some("Fake Device")
    );
    devices.disconnect_all().await;
}
