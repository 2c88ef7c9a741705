//! BLE transport layer for fitness peripherals
//!
//! Provides GATT-level abstraction traits, the per-connection write session,
//! the standard service/characteristic UUID table, and an in-process
//! simulated peripheral network for testing without hardware.

pub mod gatt;
pub mod session;
pub mod simulated;
pub mod transport;

#[cfg(feature = "ble-central")]
pub mod btleplug_central;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BleError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("No device matched the discovery filters")]
    NoDeviceFound,

    #[error("Service {0} not found on peripheral")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {characteristic} not found in service {service}")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },

    #[error("Write to {characteristic} rejected: {reason}")]
    WriteRejected { characteristic: Uuid, reason: String },

    #[error("No BLE adapter available")]
    NoAdapter,

    #[error("Peer disconnected")]
    Disconnected,
}
