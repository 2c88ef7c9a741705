//! btleplug-backed BLE central (Mac/Linux/Windows).
//!
//! Enabled with `--features ble-central`. Implements the same `BleCentral`
//! and `GattServer` traits as the simulator so the device factory and
//! drivers run unchanged against real hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::gatt::{any_filter_matches, DeviceFilter};
use super::transport::{
    BleAddress, BleCentral, CharacteristicProperties, DiscoveredPeripheral, GattCharacteristic,
    GattServer, NotificationStream,
};
use super::BleError;

impl From<btleplug::Error> for BleError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => BleError::Disconnected,
            other => BleError::GattError(other.to_string()),
        }
    }
}

/// A central bound to the first Bluetooth adapter on the host.
pub struct BtleplugCentral {
    adapter: Adapter,
    scan_timeout: Duration,
    notification_buffer: usize,
}

impl BtleplugCentral {
    /// Open the first available adapter.
    pub async fn new(scan_timeout: Duration, notification_buffer: usize) -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::NoAdapter)?;
        Ok(Self {
            adapter,
            scan_timeout,
            notification_buffer: notification_buffer.max(1),
        })
    }

    async fn find_peripheral(&self, address: &BleAddress) -> Result<Peripheral, BleError> {
        let wanted = address.to_string();
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == wanted)
            .ok_or_else(|| BleError::ConnectionError(format!("No peripheral at {}", address)))
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    async fn request_device(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<DiscoveredPeripheral, BleError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::ScanError(e.to_string()))?;
        let deadline = Instant::now() + self.scan_timeout;

        loop {
            for peripheral in self.adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                if !any_filter_matches(filters, &properties.services) {
                    continue;
                }
                if let Err(e) = self.adapter.stop_scan().await {
                    log::debug!("Failed to stop scan cleanly: {}", e);
                }
                log::info!(
                    "Found {} ({:?})",
                    peripheral.id(),
                    properties.local_name.as_deref().unwrap_or("unnamed")
                );
                return Ok(DiscoveredPeripheral {
                    address: BleAddress::Platform(peripheral.id().to_string()),
                    name: properties.local_name,
                    advertised_services: properties.services,
                    rssi: properties.rssi,
                    connectable: true,
                });
            }

            if Instant::now() >= deadline {
                if let Err(e) = self.adapter.stop_scan().await {
                    log::debug!("Failed to stop scan cleanly: {}", e);
                }
                return Err(BleError::NoDeviceFound);
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    async fn connect(
        &self,
        discovered: &DiscoveredPeripheral,
    ) -> Result<Arc<dyn GattServer>, BleError> {
        let peripheral = self.find_peripheral(&discovered.address).await?;
        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| BleError::ConnectionError(e.to_string()))?;
        }
        peripheral.discover_services().await?;

        Ok(Arc::new(BtleplugGattServer {
            peripheral,
            address: discovered.address.clone(),
            connected: AtomicBool::new(true),
            notification_buffer: self.notification_buffer,
        }))
    }
}

/// GATT client over a connected btleplug peripheral.
pub struct BtleplugGattServer {
    peripheral: Peripheral,
    address: BleAddress,
    connected: AtomicBool,
    notification_buffer: usize,
}

impl BtleplugGattServer {
    fn raw_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, BleError> {
        let services = self.peripheral.services();
        let found = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(BleError::ServiceNotFound(service))?;
        found
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or(BleError::CharacteristicNotFound {
                service,
                characteristic,
            })
    }
}

#[async_trait]
impl GattServer for BtleplugGattServer {
    fn peer_address(&self) -> &BleAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn primary_services(&self) -> Result<Vec<Uuid>, BleError> {
        Ok(self
            .peripheral
            .services()
            .iter()
            .filter(|s| s.primary)
            .map(|s| s.uuid)
            .collect())
    }

    async fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, BleError> {
        let raw = self.raw_characteristic(service, characteristic)?;
        let flags = raw.properties;
        Ok(GattCharacteristic {
            service,
            uuid: characteristic,
            properties: CharacteristicProperties {
                read: flags.contains(CharPropFlags::READ),
                write: flags.contains(CharPropFlags::WRITE),
                write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                notify: flags.contains(CharPropFlags::NOTIFY),
                indicate: flags.contains(CharPropFlags::INDICATE),
            },
        })
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let raw = self.raw_characteristic(characteristic.service, characteristic.uuid)?;
        self.peripheral
            .write(&raw, payload, WriteType::WithResponse)
            .await
            .map_err(|e| BleError::WriteRejected {
                characteristic: characteristic.uuid,
                reason: e.to_string(),
            })
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BleError> {
        let raw = self.raw_characteristic(characteristic.service, characteristic.uuid)?;
        self.peripheral.subscribe(&raw).await?;

        let mut notifications = self.peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel(self.notification_buffer);
        let wanted = characteristic.uuid;
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != wanted {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            log::debug!("Notification pump for {} ended", wanted);
        });
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.connected.store(false, Ordering::SeqCst);
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
