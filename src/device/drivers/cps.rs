//! Cycling Power Service power meter, plus the measurement decoder the
//! Kickr driver reuses.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{FieldReader, GattDeviceCore, NotificationDecoder};
use crate::ble::gatt::{CYCLING_POWER_MEASUREMENT, CYCLING_POWER_SERVICE};
use crate::ble::session::GattSession;
use crate::device::telemetry::{TelemetryEvent, TelemetryHub};
use crate::device::{ConnectedDevice, DeviceError, DeviceState};

const FLAG_PEDAL_BALANCE: u16 = 1 << 0;
const FLAG_ACCUMULATED_TORQUE: u16 = 1 << 2;
const FLAG_WHEEL_REVOLUTIONS: u16 = 1 << 4;
const FLAG_CRANK_REVOLUTIONS: u16 = 1 << 5;

/// Crank event times tick at 1/1024 s.
const CRANK_TIME_UNITS_PER_SECOND: f64 = 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankData {
    pub cumulative_revolutions: u16,
    pub last_event_time: u16,
}

/// Decoded Cycling Power Measurement (0x2A63).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclingPowerMeasurement {
    pub instantaneous_power: i16,
    pub crank: Option<CrankData>,
}

pub fn parse_cycling_power_measurement(data: &[u8]) -> Option<CyclingPowerMeasurement> {
    let mut reader = FieldReader::new(data);
    let flags = reader.u16()?;
    let instantaneous_power = reader.i16()?;

    if flags & FLAG_PEDAL_BALANCE != 0 {
        reader.skip(1)?;
    }
    if flags & FLAG_ACCUMULATED_TORQUE != 0 {
        reader.skip(2)?;
    }
    if flags & FLAG_WHEEL_REVOLUTIONS != 0 {
        reader.skip(6)?;
    }
    let crank = if flags & FLAG_CRANK_REVOLUTIONS != 0 {
        Some(CrankData {
            cumulative_revolutions: reader.u16()?,
            last_event_time: reader.u16()?,
        })
    } else {
        None
    };

    Some(CyclingPowerMeasurement {
        instantaneous_power,
        crank,
    })
}

/// Cadence from successive crank samples. Both counters are 16-bit and
/// wrap.
#[derive(Debug, Default)]
pub struct CrankCadence {
    previous: Option<CrankData>,
}

impl CrankCadence {
    /// Feed a sample; returns rpm once both revolution and time deltas are
    /// positive.
    pub fn update(&mut self, sample: CrankData) -> Option<f64> {
        let previous = self.previous.replace(sample)?;
        let revolutions = sample
            .cumulative_revolutions
            .wrapping_sub(previous.cumulative_revolutions);
        let ticks = sample.last_event_time.wrapping_sub(previous.last_event_time);
        if revolutions == 0 || ticks == 0 {
            return None;
        }
        Some(f64::from(revolutions) * 60.0 * CRANK_TIME_UNITS_PER_SECOND / f64::from(ticks))
    }
}

/// Power and crank cadence from Cycling Power Measurement notifications.
#[derive(Default)]
pub struct CyclingPowerDecoder {
    cadence: CrankCadence,
}

// Emits power, plus cadence once two crank samples are in. A single
// notification can therefore carry zero, one or two events.
impl NotificationDecoder for CyclingPowerDecoder {
    fn decode(&mut self, timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<TelemetryEvent> {
        let Some(measurement) = parse_cycling_power_measurement(payload) else {
            log::warn!("Malformed cycling power measurement: {}", hex::encode(payload));
            return Vec::new();
        };

        let mut events = vec![TelemetryEvent::power(
            timestamp,
            f64::from(measurement.instantaneous_power),
        )];
        if let Some(rpm) = measurement.crank.and_then(|c| self.cadence.update(c)) {
            events.push(TelemetryEvent::cadence(timestamp, rpm));
        }
        events
    }
}

/// A plain power meter. It reports but cannot be controlled.
pub struct CyclingPowerDevice {
    core: GattDeviceCore,
}

impl CyclingPowerDevice {
    pub async fn connect(session: Arc<GattSession>, name: &str) -> Result<Self, DeviceError> {
        let core = GattDeviceCore::new(session, name);
        if let Err(e) = core
            .monitor(
                CYCLING_POWER_SERVICE,
                CYCLING_POWER_MEASUREMENT,
                CyclingPowerDecoder::default(),
            )
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
impl ConnectedDevice for CyclingPowerDevice {
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
        "Bluetooth CPS"
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::telemetry::MetricKind;

    #[test]
    fn test_power_only() {
        let m = parse_cycling_power_measurement(&[0x00, 0x00, 0xC8, 0x00]).unwrap();
        assert_eq!(m.instantaneous_power, 200);
        assert!(m.crank.is_none());
    }

    #[test]
    fn test_crank_after_wheel_data() {
        // flags: wheel + crank; power 250; wheel revs/time skipped; crank 10 @ 2048
        let data = [
            0x30, 0x00, 0xFA, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x0A, 0x00, 0x00, 0x08,
        ];
        let m = parse_cycling_power_measurement(&data).unwrap();
        assert_eq!(m.instantaneous_power, 250);
        assert_eq!(
            m.crank,
            Some(CrankData {
                cumulative_revolutions: 10,
                last_event_time: 2048
            })
        );
    }

    #[test]
    fn test_truncated_measurement() {
        assert!(parse_cycling_power_measurement(&[0x00, 0x00, 0xC8]).is_none());
        // crank flag set but no crank bytes
        assert!(parse_cycling_power_measurement(&[0x20, 0x00, 0xC8, 0x00]).is_none());
    }

    #[test]
    fn test_cadence_needs_two_samples() {
        let mut cadence = CrankCadence::default();
        assert_eq!(
            cadence.update(CrankData {
                cumulative_revolutions: 100,
                last_event_time: 0
            }),
            None
        );
        // 1.5 revs per second
        let rpm = cadence
            .update(CrankData {
                cumulative_revolutions: 103,
                last_event_time: 2048,
            })
            .unwrap();
        assert!((rpm - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_cadence_handles_wraparound() {
        let mut cadence = CrankCadence::default();
        cadence.update(CrankData {
            cumulative_revolutions: u16::MAX,
            last_event_time: u16::MAX - 511,
        });
        let rpm = cadence
            .update(CrankData {
                cumulative_revolutions: 0,
                last_event_time: 512,
            })
            .unwrap();
        // one rev in 1024 ticks = 60 rpm
        assert!((rpm - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_crank_event_is_ignored() {
        let mut cadence = CrankCadence::default();
        let sample = CrankData {
            cumulative_revolutions: 5,
            last_event_time: 1000,
        };
        cadence.update(sample);
        assert_eq!(cadence.update(sample), None);
    }

    #[test]
    fn test_decoder_emits_power_then_cadence() {
        let mut decoder = CyclingPowerDecoder::default();
        let now = Utc::now();
        let first = [0x20, 0x00, 0xC8, 0x00, 0x00, 0x00, 0x00, 0x00];
        let second = [0x20, 0x00, 0xD2, 0x00, 0x01, 0x00, 0x00, 0x04];

        let events = decoder.decode(now, &first);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MetricKind::Power);

        let events = decoder.decode(now, &second);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, 210.0);
        assert_eq!(events[1].kind, MetricKind::Cadence);
        assert!((events[1].value - 60.0).abs() < 1e-9);
    }
}
