//! BLE transport trait definitions and core types
//!
//! Defines the abstract GATT client interface that both the simulated
//! peripherals and the btleplug central conform to. Drivers never see a
//! concrete backend; they talk to `GattServer` through a `GattSession`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::gatt::DeviceFilter;
use super::BleError;

/// A BLE device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BleAddress {
    /// A real 6-byte BLE MAC address.
    Real([u8; 6]),
    /// An opaque platform identifier (CoreBluetooth UUIDs, BlueZ paths).
    Platform(String),
    /// A simulated address identified by UUID.
    Simulated(Uuid),
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleAddress::Real(mac) => write!(
                f,
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
            BleAddress::Platform(id) => write!(f, "{}", id),
            BleAddress::Simulated(id) => write!(f, "sim-{}", id),
        }
    }
}

/// A peripheral selected by discovery, not yet connected.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    pub address: BleAddress,
    pub name: Option<String>,
    /// Services listed in the advertisement.
    pub advertised_services: Vec<Uuid>,
    pub rssi: Option<i16>,
    /// False when the peripheral exposes no GATT server we can connect to.
    pub connectable: bool,
}

/// Property bits of a GATT characteristic that we care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// A resolved characteristic handle. Cheap to clone; cached per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Stream of raw notification payloads from one characteristic.
/// Closes when the peripheral disconnects.
pub type NotificationStream = mpsc::Receiver<Vec<u8>>;

/// The GATT server of a connected peripheral.
#[async_trait]
pub trait GattServer: Send + Sync {
    /// Get the peer's BLE address.
    fn peer_address(&self) -> &BleAddress;

    /// Check whether the connection is still active.
    fn is_connected(&self) -> bool;

    /// Enumerate the primary services exposed by the peripheral.
    async fn primary_services(&self) -> Result<Vec<Uuid>, BleError>;

    /// Look up a characteristic inside a primary service.
    async fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, BleError>;

    /// Write a value to a characteristic (with response).
    async fn write(&self, characteristic: &GattCharacteristic, payload: &[u8])
        -> Result<(), BleError>;

    /// Enable notifications and return the stream of values.
    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BleError>;

    /// Disconnect from the peer.
    async fn disconnect(&self) -> Result<(), BleError>;
}

/// BLE central role: picking a peripheral and connecting to it.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Find a peripheral matching any of the filters. Mirrors a browser
    /// device chooser: the first match is returned.
    async fn request_device(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<DiscoveredPeripheral, BleError>;

    /// Connect to the peripheral's GATT server.
    async fn connect(
        &self,
        peripheral: &DiscoveredPeripheral,
    ) -> Result<Arc<dyn GattServer>, BleError>;
}
