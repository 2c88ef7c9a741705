//! Wahoo Kickr trainer over its vendor control characteristic.
//!
//! Power and cadence come from the standard Cycling Power Measurement the
//! Kickr also exposes. Commands are single-opcode frames written to the
//! vendor characteristic, which must be unlocked once per connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::cps::CyclingPowerDecoder;
use super::{DriverOptions, GattDeviceCore, ResponseLogger};
use crate::ble::gatt::{
    CYCLING_POWER_MEASUREMENT, CYCLING_POWER_SERVICE, KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC,
};
use crate::ble::session::GattSession;
use crate::device::telemetry::TelemetryHub;
use crate::device::{ConnectedDevice, DeviceError, DeviceState};

pub mod opcode {
    pub const UNLOCK: u8 = 0x20;
    pub const SET_RESISTANCE: u8 = 0x40;
    pub const SET_ERG: u8 = 0x42;
    pub const SET_SIM_MODE: u8 = 0x43;
    pub const SET_GRADE: u8 = 0x46;
}

pub fn build_unlock() -> Vec<u8> {
    vec![opcode::UNLOCK, 0xEE, 0xFC]
}

pub fn build_erg(watts: f64) -> Vec<u8> {
    let watts = watts.round().clamp(0.0, f64::from(u16::MAX)) as u16;
    frame(opcode::SET_ERG, &[watts])
}

/// Sim mode parameters: rider weight (0.01 kg), rolling resistance
/// (×10000) and wind resistance (×1000).
pub fn build_sim_mode(options: &DriverOptions) -> Vec<u8> {
    frame(
        opcode::SET_SIM_MODE,
        &[
            to_u16(options.rider_mass_kg * 100.0),
            to_u16(options.crr * 10_000.0),
            to_u16(options.wind_coefficient * 1_000.0),
        ],
    )
}

/// Grade maps -100 %..+100 % onto the full u16 range.
pub fn build_grade(grade_pct: f64) -> Vec<u8> {
    let fraction = (grade_pct / 100.0).clamp(-1.0, 1.0);
    frame(opcode::SET_GRADE, &[to_u16((fraction + 1.0) * 32_767.5)])
}

/// Resistance is inverted: 0 is the strongest brake setting.
pub fn build_resistance(pct: f64) -> Vec<u8> {
    let fraction = (pct / 100.0).clamp(0.0, 1.0);
    frame(opcode::SET_RESISTANCE, &[to_u16((1.0 - fraction) * 16_383.0)])
}

fn to_u16(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn frame(opcode: u8, fields: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + fields.len() * 2);
    payload.push(opcode);
    for field in fields {
        payload.extend_from_slice(&field.to_le_bytes());
    }
    payload
}

pub struct KickrDevice {
    core: GattDeviceCore,
    options: DriverOptions,
    sim_mode_sent: AtomicBool,
}

impl KickrDevice {
    pub async fn connect(
        session: Arc<GattSession>,
        name: &str,
        options: DriverOptions,
    ) -> Result<Self, DeviceError> {
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

        if let Err(e) = core
            .monitor(
                KICKR_SERVICE,
                KICKR_WRITE_CHARACTERISTIC,
                ResponseLogger { label: "Kickr" },
            )
            .await
        {
            log::warn!("Kickr responses unavailable: {}", e);
        }

        if let Err(e) = core
            .startup_write(KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC, build_unlock())
            .await
        {
            log::warn!("Kickr unlock failed, trainer may ignore commands: {}", e);
        }

        core.mark_ready();
        Ok(Self {
            core,
            options,
            sim_mode_sent: AtomicBool::new(false),
        })
    }

    async fn write(&self, payload: Vec<u8>) -> Result<bool, DeviceError> {
        self.core
            .command(KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC, payload)
            .await
    }
}

#[async_trait]
impl ConnectedDevice for KickrDevice {
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
        "Wahoo Kickr"
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
        // ERG leaves sim mode; the next grade has to re-enter it.
        self.sim_mode_sent.store(false, Ordering::SeqCst);
        self.write(build_erg(watts)).await
    }

    async fn update_slope(&self, slope_pct: f64) -> Result<bool, DeviceError> {
        if !self.sim_mode_sent.load(Ordering::SeqCst) {
            if !self.write(build_sim_mode(&self.options)).await? {
                return Ok(false);
            }
            self.sim_mode_sent.store(true, Ordering::SeqCst);
        }
        self.write(build_grade(slope_pct)).await
    }

    async fn update_resistance(&self, resistance_pct: f64) -> Result<bool, DeviceError> {
        self.sim_mode_sent.store(false, Ordering::SeqCst);
        self.write(build_resistance(resistance_pct)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_and_erg() {
        assert_eq!(build_unlock(), vec![0x20, 0xEE, 0xFC]);
        assert_eq!(build_erg(250.0), vec![0x42, 0xFA, 0x00]);
        assert_eq!(build_erg(-5.0), vec![0x42, 0x00, 0x00]);
    }

    #[test]
    fn test_sim_mode_frame() {
        // 75 kg -> 7500, crr 0.004 -> 40, cw 0.51 -> 510
        assert_eq!(
            build_sim_mode(&DriverOptions::default()),
            vec![0x43, 0x4C, 0x1D, 0x28, 0x00, 0xFE, 0x01]
        );
    }

    #[test]
    fn test_grade_maps_onto_u16_range() {
        assert_eq!(build_grade(0.0), vec![0x46, 0x00, 0x80]);
        assert_eq!(build_grade(-100.0), vec![0x46, 0x00, 0x00]);
        assert_eq!(build_grade(100.0), vec![0x46, 0xFF, 0xFF]);
        assert_eq!(build_grade(400.0), build_grade(100.0));
    }

    #[test]
    fn test_resistance_is_inverted() {
        assert_eq!(build_resistance(0.0), vec![0x40, 0xFF, 0x3F]);
        assert_eq!(build_resistance(100.0), vec![0x40, 0x00, 0x00]);
    }
}
