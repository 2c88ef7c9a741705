//! Pick a driver from the services a peripheral exposes.

use std::fmt;

use uuid::Uuid;

use super::DeviceError;
use crate::ble::gatt::{CYCLING_POWER_SERVICE, FTMS_SERVICE, HEART_RATE_SERVICE, KICKR_SERVICE};

/// The closed set of GATT driver variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Ftms,
    Kickr,
    CyclingPower,
    HeartRate,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverKind::Ftms => "ftms",
            DriverKind::Kickr => "kickr",
            DriverKind::CyclingPower => "cps",
            DriverKind::HeartRate => "hrm",
        };
        f.write_str(s)
    }
}

/// Classify by primary services. Precedence is FTMS, then Kickr, then
/// CPS, then HRM: trainers also expose CPS, and the richer control
/// protocol wins.
pub fn classify(services: &[Uuid]) -> Result<DriverKind, DeviceError> {
    const PRECEDENCE: [(Uuid, DriverKind); 4] = [
        (FTMS_SERVICE, DriverKind::Ftms),
        (KICKR_SERVICE, DriverKind::Kickr),
        (CYCLING_POWER_SERVICE, DriverKind::CyclingPower),
        (HEART_RATE_SERVICE, DriverKind::HeartRate),
    ];

    PRECEDENCE
        .iter()
        .find(|(service, _)| services.contains(service))
        .map(|(_, kind)| *kind)
        .ok_or(DeviceError::UnrecognizedDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::sig_uuid;

    #[test]
    fn test_ftms_beats_everything() {
        let services = [
            HEART_RATE_SERVICE,
            CYCLING_POWER_SERVICE,
            KICKR_SERVICE,
            FTMS_SERVICE,
        ];
        assert_eq!(classify(&services).unwrap(), DriverKind::Ftms);
    }

    #[test]
    fn test_kickr_beats_cps() {
        assert_eq!(
            classify(&[CYCLING_POWER_SERVICE, KICKR_SERVICE]).unwrap(),
            DriverKind::Kickr
        );
    }

    #[test]
    fn test_plain_power_meter_and_strap() {
        assert_eq!(
            classify(&[CYCLING_POWER_SERVICE]).unwrap(),
            DriverKind::CyclingPower
        );
        assert_eq!(
            classify(&[sig_uuid(0x180a), HEART_RATE_SERVICE]).unwrap(),
            DriverKind::HeartRate
        );
    }

    #[test]
    fn test_unknown_services_are_rejected() {
        let result = classify(&[sig_uuid(0x180a), sig_uuid(0x180f)]);
        assert!(matches!(result, Err(DeviceError::UnrecognizedDevice)));
        assert!(matches!(classify(&[]), Err(DeviceError::UnrecognizedDevice)));
    }
}
