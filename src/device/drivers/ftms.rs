//! Fitness Machine Service smart trainer.
//!
//! Telemetry arrives on Indoor Bike Data (0x2AD2). Commands go to the
//! Fitness Machine Control Point (0x2AD9) after control has been requested.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DriverOptions, FieldReader, GattDeviceCore, NotificationDecoder, ResponseLogger};
use crate::ble::gatt::{FTMS_CONTROL_POINT, FTMS_SERVICE, INDOOR_BIKE_DATA};
use crate::ble::session::GattSession;
use crate::device::telemetry::{TelemetryEvent, TelemetryHub};
use crate::device::{ConnectedDevice, DeviceError, DeviceState};

/// Control point opcodes.
pub mod opcode {
    pub const REQUEST_CONTROL: u8 = 0x00;
    pub const SET_TARGET_RESISTANCE: u8 = 0x04;
    pub const SET_TARGET_POWER: u8 = 0x05;
    pub const SET_INDOOR_BIKE_SIMULATION: u8 = 0x11;
}

// Indoor Bike Data flag bits. Bit 0 is inverted: clear means speed present.
const FLAG_MORE_DATA: u16 = 1 << 0;
const FLAG_AVG_SPEED: u16 = 1 << 1;
const FLAG_INST_CADENCE: u16 = 1 << 2;
const FLAG_AVG_CADENCE: u16 = 1 << 3;
const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
const FLAG_INST_POWER: u16 = 1 << 6;
const FLAG_AVG_POWER: u16 = 1 << 7;
const FLAG_EXPENDED_ENERGY: u16 = 1 << 8;
const FLAG_HEART_RATE: u16 = 1 << 9;

/// The fields of Indoor Bike Data we consume.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndoorBikeData {
    pub speed_kmh: Option<f64>,
    pub cadence_rpm: Option<f64>,
    pub total_distance_m: Option<u32>,
    pub resistance_level: Option<i16>,
    pub power_watts: Option<i16>,
    pub heart_rate_bpm: Option<u8>,
}

pub fn parse_indoor_bike_data(data: &[u8]) -> Option<IndoorBikeData> {
    let mut reader = FieldReader::new(data);
    let flags = reader.u16()?;
    let present = |bit: u16| flags & bit != 0;
    let mut out = IndoorBikeData::default();

    if !present(FLAG_MORE_DATA) {
        out.speed_kmh = Some(f64::from(reader.u16()?) / 100.0);
    }
    if present(FLAG_AVG_SPEED) {
        reader.skip(2)?;
    }
    if present(FLAG_INST_CADENCE) {
        out.cadence_rpm = Some(f64::from(reader.u16()?) / 2.0);
    }
    if present(FLAG_AVG_CADENCE) {
        reader.skip(2)?;
    }
    if present(FLAG_TOTAL_DISTANCE) {
        out.total_distance_m = Some(reader.u24()?);
    }
    if present(FLAG_RESISTANCE_LEVEL) {
        out.resistance_level = Some(reader.i16()?);
    }
    if present(FLAG_INST_POWER) {
        out.power_watts = Some(reader.i16()?);
    }
    if present(FLAG_AVG_POWER) {
        reader.skip(2)?;
    }
    if present(FLAG_EXPENDED_ENERGY) {
        // total u16, per hour u16, per minute u8
        reader.skip(5)?;
    }
    if present(FLAG_HEART_RATE) {
        out.heart_rate_bpm = Some(reader.u8()?);
    }
    Some(out)
}

#[derive(Default)]
pub struct IndoorBikeDecoder;

// One event per metric present, not one per notification: a trainer
// reporting power and cadence together feeds both slots.
impl NotificationDecoder for IndoorBikeDecoder {
    fn decode(&mut self, timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<TelemetryEvent> {
        let Some(data) = parse_indoor_bike_data(payload) else {
            log::warn!("Malformed indoor bike data: {}", hex::encode(payload));
            return Vec::new();
        };
        let mut events = Vec::with_capacity(2);
        if let Some(watts) = data.power_watts {
            events.push(TelemetryEvent::power(timestamp, f64::from(watts)));
        }
        if let Some(rpm) = data.cadence_rpm {
            events.push(TelemetryEvent::cadence(timestamp, rpm));
        }
        events
    }
}

pub fn build_request_control() -> Vec<u8> {
    vec![opcode::REQUEST_CONTROL]
}

pub fn build_set_target_power(watts: f64) -> Vec<u8> {
    let watts = watts.round().clamp(0.0, f64::from(i16::MAX)) as i16;
    let mut payload = vec![opcode::SET_TARGET_POWER];
    payload.extend_from_slice(&watts.to_le_bytes());
    payload
}

/// Indoor Bike Simulation parameters: wind speed (0.001 m/s), grade
/// (0.01 %), rolling resistance (0.0001) and wind coefficient (0.01 kg/m).
pub fn build_set_simulation(grade_pct: f64, options: &DriverOptions) -> Vec<u8> {
    let wind: i16 = 0;
    let grade = (grade_pct * 100.0)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    let crr = (options.crr * 10_000.0).round().clamp(0.0, 255.0) as u8;
    let cw = (options.wind_coefficient * 100.0).round().clamp(0.0, 255.0) as u8;

    let mut payload = vec![opcode::SET_INDOOR_BIKE_SIMULATION];
    payload.extend_from_slice(&wind.to_le_bytes());
    payload.extend_from_slice(&grade.to_le_bytes());
    payload.push(crr);
    payload.push(cw);
    payload
}

/// Target resistance in 0.1 units of the trainer's resistance range.
pub fn build_set_target_resistance(pct: f64) -> Vec<u8> {
    let level = (pct.clamp(0.0, 100.0) * 10.0).round() as i16;
    let mut payload = vec![opcode::SET_TARGET_RESISTANCE];
    payload.extend_from_slice(&level.to_le_bytes());
    payload
}

pub struct FtmsDevice {
    core: GattDeviceCore,
    options: DriverOptions,
}

impl FtmsDevice {
    pub async fn connect(
        session: Arc<GattSession>,
        name: &str,
        options: DriverOptions,
    ) -> Result<Self, DeviceError> {
        let core = GattDeviceCore::new(session, name);
        if let Err(e) = core
            .monitor(FTMS_SERVICE, INDOOR_BIKE_DATA, IndoorBikeDecoder)
            .await
        {
            core.mark_failed();
            return Err(e);
        }

        // Some trainers only answer control point writes when indications
        // are on. Missing indications do not stop telemetry.
        if let Err(e) = core
            .monitor(
                FTMS_SERVICE,
                FTMS_CONTROL_POINT,
                ResponseLogger {
                    label: "FTMS control point",
                },
            )
            .await
        {
            log::warn!("FTMS control point indications unavailable: {}", e);
        }

        if let Err(e) = core
            .startup_write(FTMS_SERVICE, FTMS_CONTROL_POINT, build_request_control())
            .await
        {
            log::warn!("FTMS request-control failed, trainer may ignore commands: {}", e);
        }

        core.mark_ready();
        Ok(Self { core, options })
    }
}

#[async_trait]
impl ConnectedDevice for FtmsDevice {
    fn device_id(&self) -> String {
        self.core.device_id()
    }

    fn state(&self) -> DeviceState {
        self.core.state()
    }

    fn name(&self) -> String {
        self.core.name()
    }

    fn type_description(&self) -> &'static str {
        "Bluetooth FTMS"
    }

    fn has_power(&self) -> bool {
        true
    }

    fn has_cadence(&self) -> bool {
        true
    }

    fn has_hrm(&self) -> bool {
        false
    }

    fn telemetry(&self) -> &TelemetryHub {
        self.core.telemetry()
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.core.disconnect().await
    }

    async fn update_erg(&self, watts: f64) -> Result<bool, DeviceError> {
        self.core
            .command(FTMS_SERVICE, FTMS_CONTROL_POINT, build_set_target_power(watts))
            .await
    }

    async fn update_slope(&self, slope_pct: f64) -> Result<bool, DeviceError> {
        self.core
            .command(
                FTMS_SERVICE,
                FTMS_CONTROL_POINT,
                build_set_simulation(slope_pct, &self.options),
            )
            .await
    }

    async fn update_resistance(&self, resistance_pct: f64) -> Result<bool, DeviceError> {
        self.core
            .command(
                FTMS_SERVICE,
                FTMS_CONTROL_POINT,
                build_set_target_resistance(resistance_pct),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::telemetry::MetricKind;

    #[test]
    fn test_speed_cadence_power() {
        // flags 0x0044: inst cadence + inst power, speed present (bit 0 clear)
        // speed 30.00 km/h, cadence 90 rpm (180 half-rpm), power 200 W
        let data = [0x44, 0x00, 0xB8, 0x0B, 0xB4, 0x00, 0xC8, 0x00];
        let parsed = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(parsed.speed_kmh, Some(30.0));
        assert_eq!(parsed.cadence_rpm, Some(90.0));
        assert_eq!(parsed.power_watts, Some(200));
    }

    #[test]
    fn test_more_data_suppresses_speed() {
        // More Data set, only power present
        let data = [0x41, 0x00, 0x2C, 0x01];
        let parsed = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(parsed.speed_kmh, None);
        assert_eq!(parsed.power_watts, Some(300));
    }

    #[test]
    fn test_fields_before_power_are_skipped() {
        // more data, avg speed, total distance, resistance, power, heart rate
        let flags: u16 = 0x0001 | 0x0002 | 0x0010 | 0x0020 | 0x0040 | 0x0200;
        let mut data = flags.to_le_bytes().to_vec();
        data.extend_from_slice(&[0x00, 0x00]); // avg speed
        data.extend_from_slice(&[0xE8, 0x03, 0x00]); // 1000 m
        data.extend_from_slice(&[0x0A, 0x00]); // resistance 10
        data.extend_from_slice(&[0x96, 0x00]); // 150 W
        data.push(142); // bpm
        let parsed = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(parsed.total_distance_m, Some(1000));
        assert_eq!(parsed.resistance_level, Some(10));
        assert_eq!(parsed.power_watts, Some(150));
        assert_eq!(parsed.heart_rate_bpm, Some(142));
    }

    #[test]
    fn test_truncated_indoor_bike_data() {
        assert!(parse_indoor_bike_data(&[0x44]).is_none());
        assert!(parse_indoor_bike_data(&[0x44, 0x00, 0xB8, 0x0B, 0xB4]).is_none());
    }

    #[test]
    fn test_decoder_one_event_per_metric() {
        let mut decoder = IndoorBikeDecoder;
        let now = Utc::now();
        let events = decoder.decode(now, &[0x44, 0x00, 0xB8, 0x0B, 0xB4, 0x00, 0xC8, 0x00]);
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MetricKind::Power, MetricKind::Cadence]);
    }

    #[test]
    fn test_control_point_payloads() {
        assert_eq!(build_request_control(), vec![0x00]);
        assert_eq!(build_set_target_power(250.0), vec![0x05, 0xFA, 0x00]);
        assert_eq!(build_set_target_power(-20.0), vec![0x05, 0x00, 0x00]);
        assert_eq!(build_set_target_resistance(40.0), vec![0x04, 0x90, 0x01]);
    }

    #[test]
    fn test_simulation_payload() {
        let payload = build_set_simulation(-2.5, &DriverOptions::default());
        // wind 0, grade -250 (0.01 %), crr 40, cw 51
        assert_eq!(payload, vec![0x11, 0x00, 0x00, 0x06, 0xFF, 40, 51]);
    }
}
