//! GATT service and characteristic identifiers
//!
//! The Bluetooth SIG assigned numbers for the fitness profiles we speak,
//! plus the Wahoo Kickr vendor service. Values are literal so we interoperate
//! with real hardware.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expand a 16-bit SIG assigned number into the full Bluetooth base UUID
/// (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Fitness Machine Service (0x1826).
pub const FTMS_SERVICE: Uuid = sig_uuid(0x1826);
/// Indoor Bike Data (0x2AD2), notify.
pub const INDOOR_BIKE_DATA: Uuid = sig_uuid(0x2ad2);
/// Fitness Machine Control Point (0x2AD9), write + indicate.
pub const FTMS_CONTROL_POINT: Uuid = sig_uuid(0x2ad9);

/// Cycling Power Service (0x1818).
pub const CYCLING_POWER_SERVICE: Uuid = sig_uuid(0x1818);
/// Cycling Power Measurement (0x2A63), notify.
pub const CYCLING_POWER_MEASUREMENT: Uuid = sig_uuid(0x2a63);

/// Heart Rate Service (0x180D).
pub const HEART_RATE_SERVICE: Uuid = sig_uuid(0x180d);
/// Heart Rate Measurement (0x2A37), notify.
pub const HEART_RATE_MEASUREMENT: Uuid = sig_uuid(0x2a37);

/// Wahoo Kickr trainer control service.
pub const KICKR_SERVICE: Uuid = Uuid::from_u128(0xa026ee01_0a7d_4ab3_97fa_f1500f9feb8b);
/// Wahoo Kickr trainer write characteristic.
pub const KICKR_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xa026e005_0a7d_4ab3_97fa_f1500f9feb8b);

/// Human-readable name for a known service, used in log output.
pub fn service_name(service: &Uuid) -> &'static str {
    match *service {
        FTMS_SERVICE => "fitness_machine",
        CYCLING_POWER_SERVICE => "cycling_power",
        HEART_RATE_SERVICE => "heart_rate",
        KICKR_SERVICE => "kickr",
        _ => "unknown",
    }
}

/// A discovery filter: a peripheral matches when it advertises every
/// service in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub services: Vec<Uuid>,
}

impl DeviceFilter {
    pub fn new(services: &[Uuid]) -> Self {
        Self {
            services: services.to_vec(),
        }
    }

    /// True if `advertised` contains every service this filter requires.
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.services.iter().all(|s| advertised.contains(s))
    }
}

/// Filters used when looking for a power source (power meter or trainer).
pub fn powermeter_filters() -> Vec<DeviceFilter> {
    vec![
        DeviceFilter::new(&[CYCLING_POWER_SERVICE]),
        DeviceFilter::new(&[FTMS_SERVICE, CYCLING_POWER_SERVICE]),
        DeviceFilter::new(&[KICKR_SERVICE, CYCLING_POWER_SERVICE]),
    ]
}

/// Filters used when looking for a heart-rate monitor.
pub fn hrm_filters() -> Vec<DeviceFilter> {
    vec![DeviceFilter::new(&[HEART_RATE_SERVICE])]
}

/// True if any of `filters` matches the advertised service list.
pub fn any_filter_matches(filters: &[DeviceFilter], advertised: &[Uuid]) -> bool {
    filters.iter().any(|f| f.matches(advertised))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_uuids_match_assigned_numbers() {
        assert_eq!(
            FTMS_SERVICE.to_string(),
            "00001826-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CYCLING_POWER_SERVICE.to_string(),
            "00001818-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_kickr_uuids() {
        assert_eq!(
            KICKR_SERVICE.to_string(),
            "a026ee01-0a7d-4ab3-97fa-f1500f9feb8b"
        );
        assert_eq!(
            KICKR_WRITE_CHARACTERISTIC.to_string(),
            "a026e005-0a7d-4ab3-97fa-f1500f9feb8b"
        );
    }

    #[test]
    fn test_filter_requires_every_service() {
        let filter = DeviceFilter::new(&[FTMS_SERVICE, CYCLING_POWER_SERVICE]);
        assert!(filter.matches(&[CYCLING_POWER_SERVICE, FTMS_SERVICE, HEART_RATE_SERVICE]));
        assert!(!filter.matches(&[FTMS_SERVICE]));
    }

    #[test]
    fn test_powermeter_filters_accept_plain_cps() {
        let filters = powermeter_filters();
        assert!(any_filter_matches(&filters, &[CYCLING_POWER_SERVICE]));
        assert!(!any_filter_matches(&filters, &[HEART_RATE_SERVICE]));
        assert!(any_filter_matches(&hrm_filters(), &[HEART_RATE_SERVICE]));
    }
}
