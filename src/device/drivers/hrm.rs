//! Heart Rate Service strap.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{FieldReader, GattDeviceCore, NotificationDecoder};
use crate::ble::gatt::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use crate::ble::session::GattSession;
use crate::device::telemetry::{TelemetryEvent, TelemetryHub};
use crate::device::{ConnectedDevice, DeviceError, DeviceState};

const FLAG_HR_U16: u8 = 0x01;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
const FLAG_RR_INTERVALS: u8 = 0x10;

/// Decoded Heart Rate Measurement (0x2A37).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
    pub energy_expended_kj: Option<u16>,
    /// RR intervals in 1/1024 s.
    pub rr_intervals: Vec<u16>,
}

/// Byte 0 is the flag field; bit 0 selects a u8 or little-endian u16 heart
/// rate at offset 1.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Option<HeartRateMeasurement> {
    let mut reader = FieldReader::new(data);
    let flags = reader.u8()?;

    let bpm = if flags & FLAG_HR_U16 == 0 {
        u16::from(reader.u8()?)
    } else {
        reader.u16()?
    };

    let mut measurement = HeartRateMeasurement {
        bpm,
        ..Default::default()
    };
    if flags & FLAG_ENERGY_EXPENDED != 0 {
        measurement.energy_expended_kj = reader.u16();
    }
    if flags & FLAG_RR_INTERVALS != 0 {
        while let Some(rr) = reader.u16() {
            measurement.rr_intervals.push(rr);
        }
    }
    Some(measurement)
}

#[derive(Default)]
pub struct HeartRateDecoder;

impl NotificationDecoder for HeartRateDecoder {
    fn decode(&mut self, timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<TelemetryEvent> {
        match parse_heart_rate_measurement(payload) {
            Some(m) => vec![TelemetryEvent::heart_rate(timestamp, f64::from(m.bpm))],
            None => {
                log::warn!("Malformed heart rate measurement: {}", hex::encode(payload));
                Vec::new()
            }
        }
    }
}

/// A heart-rate-only device. Every trainer command resolves `false`.
pub struct HeartRateDevice {
    core: GattDeviceCore,
}

impl HeartRateDevice {
    pub async fn connect(session: Arc<GattSession>, name: &str) -> Result<Self, DeviceError> {
        let core = GattDeviceCore::new(session, name);
        if let Err(e) = core
            .monitor(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT, HeartRateDecoder)
            .await
        {
            core.mark_failed();
            return Err(e);
        }
        core.mark_ready();
        Ok(Self { core })
    }
}

#[async_trait]
impl ConnectedDevice for HeartRateDevice {
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
        "Bluetooth HRM"
    }

    fn has_power(&self) -> bool {
        false
    }

    fn has_cadence(&self) -> bool {
        false
    }

    fn has_hrm(&self) -> bool {
        true
    }

    fn telemetry(&self) -> &TelemetryHub {
        self.core.telemetry()
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.core.disconnect().await
    }
}
