//! In-process BLE simulator
//!
//! Provides a simulated "air" in which fake GATT peripherals (trainers,
//! power meters, heart-rate straps) can be discovered and driven entirely
//! in-process. Used for integration testing without real BLE hardware:
//! tests push notifications into a peripheral and inspect the writes it
//! received, in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::gatt::{any_filter_matches, DeviceFilter};
use super::transport::{
    BleAddress, BleCentral, CharacteristicProperties, DiscoveredPeripheral, GattCharacteristic,
    GattServer, NotificationStream,
};
use super::BleError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A write observed by a simulated peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

/// Description of a simulated peripheral, built before it is placed on the
/// network.
#[derive(Debug, Clone)]
pub struct SimPeripheralSpec {
    name: String,
    services: Vec<(Uuid, Vec<Uuid>)>,
    advertised: Option<Vec<Uuid>>,
    connectable: bool,
    write_latency: Duration,
}

impl SimPeripheralSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
            advertised: None,
            connectable: true,
            write_latency: Duration::ZERO,
        }
    }

    /// Add a characteristic (and its service, if new).
    pub fn with_characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        match self.services.iter_mut().find(|(s, _)| *s == service) {
            Some((_, chars)) => chars.push(characteristic),
            None => self.services.push((service, vec![characteristic])),
        }
        self
    }

    /// Override the advertised service list. Defaults to every service.
    pub fn advertising(mut self, services: &[Uuid]) -> Self {
        self.advertised = Some(services.to_vec());
        self
    }

    /// Advertise but refuse GATT connections.
    pub fn without_gatt(mut self) -> Self {
        self.connectable = false;
        self
    }

    /// Simulated link-layer latency applied to each write.
    /// Uses tokio time, so paused test clocks advance instantly.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }
}

struct PeripheralState {
    address: BleAddress,
    name: String,
    services: Vec<(Uuid, Vec<Uuid>)>,
    advertised: Vec<Uuid>,
    connectable: bool,
    write_latency: Duration,
    connected: AtomicBool,
    pending_failures: AtomicUsize,
    writes: Mutex<Vec<RecordedWrite>>,
    subscribers: Mutex<HashMap<(Uuid, Uuid), Vec<mpsc::Sender<Vec<u8>>>>>,
}

/// Test-side handle to a simulated peripheral.
#[derive(Clone)]
pub struct SimPeripheral {
    state: Arc<PeripheralState>,
}

impl SimPeripheral {
    pub fn address(&self) -> &BleAddress {
        &self.state.address
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Every write received so far, in arrival order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.state.writes).clone()
    }

    /// Reject the next `count` writes with a transport error.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Push a notification to every subscriber of a characteristic.
    /// Returns the number of subscribers that received it.
    pub fn notify(&self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> usize {
        let mut subscribers = lock(&self.state.subscribers);
        let Some(senders) = subscribers.get_mut(&(service, characteristic)) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.try_send(payload.to_vec()).is_ok())
            .count()
    }

    /// Number of live subscriptions on a characteristic.
    pub fn subscriber_count(&self, service: Uuid, characteristic: Uuid) -> usize {
        lock(&self.state.subscribers)
            .get(&(service, characteristic))
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Simulate the link dropping: notification streams close and further
    /// writes fail.
    pub fn drop_link(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        lock(&self.state.subscribers).clear();
    }

    fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, BleError> {
        let (_, chars) = self
            .state
            .services
            .iter()
            .find(|(s, _)| *s == service)
            .ok_or(BleError::ServiceNotFound(service))?;
        if !chars.contains(&characteristic) {
            return Err(BleError::CharacteristicNotFound {
                service,
                characteristic,
            });
        }
        Ok(GattCharacteristic {
            service,
            uuid: characteristic,
            properties: CharacteristicProperties {
                read: true,
                write: true,
                write_without_response: false,
                notify: true,
                indicate: false,
            },
        })
    }
}

/// The simulated "air": a shared registry of peripherals visible to every
/// simulated central.
pub struct SimBleNetwork {
    peripherals: Mutex<Vec<SimPeripheral>>,
}

impl SimBleNetwork {
    /// Create a new simulated BLE network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peripherals: Mutex::new(Vec::new()),
        })
    }

    /// Place a peripheral on the network.
    pub fn add_peripheral(&self, spec: SimPeripheralSpec) -> SimPeripheral {
        let advertised = spec
            .advertised
            .unwrap_or_else(|| spec.services.iter().map(|(s, _)| *s).collect());
        let peripheral = SimPeripheral {
            state: Arc::new(PeripheralState {
                address: BleAddress::Simulated(Uuid::new_v4()),
                name: spec.name,
                services: spec.services,
                advertised,
                connectable: spec.connectable,
                write_latency: spec.write_latency,
                connected: AtomicBool::new(false),
                pending_failures: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                subscribers: Mutex::new(HashMap::new()),
            }),
        };
        lock(&self.peripherals).push(peripheral.clone());
        peripheral
    }

    /// Create a central that scans this network.
    pub fn create_central(self: &Arc<Self>) -> SimCentral {
        SimCentral {
            network: Arc::clone(self),
            notification_buffer: 64,
        }
    }
}

/// A simulated central (the host side of the link).
pub struct SimCentral {
    network: Arc<SimBleNetwork>,
    notification_buffer: usize,
}

impl SimCentral {
    /// Set the capacity of notification streams handed out by connections.
    pub fn set_notification_buffer(&mut self, capacity: usize) {
        self.notification_buffer = capacity.max(1);
    }
}

#[async_trait]
impl BleCentral for SimCentral {
    async fn request_device(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<DiscoveredPeripheral, BleError> {
        let peripherals = lock(&self.network.peripherals);
        let found = peripherals
            .iter()
            .find(|p| any_filter_matches(filters, &p.state.advertised))
            .ok_or(BleError::NoDeviceFound)?;
        Ok(DiscoveredPeripheral {
            address: found.state.address.clone(),
            name: Some(found.state.name.clone()),
            advertised_services: found.state.advertised.clone(),
            rssi: Some(-50),
            connectable: found.state.connectable,
        })
    }

    async fn connect(
        &self,
        peripheral: &DiscoveredPeripheral,
    ) -> Result<Arc<dyn GattServer>, BleError> {
        let target = {
            let peripherals = lock(&self.network.peripherals);
            peripherals
                .iter()
                .find(|p| p.state.address == peripheral.address)
                .cloned()
                .ok_or_else(|| {
                    BleError::ConnectionError(format!(
                        "No peripheral at {}",
                        peripheral.address
                    ))
                })?
        };
        if !target.state.connectable {
            return Err(BleError::ConnectionError(format!(
                "{} does not accept GATT connections",
                peripheral.address
            )));
        }
        target.state.connected.store(true, Ordering::SeqCst);
        Ok(Arc::new(SimGattServer {
            peripheral: target,
            notification_buffer: self.notification_buffer,
        }))
    }
}

/// GATT client view of a simulated peripheral.
pub struct SimGattServer {
    peripheral: SimPeripheral,
    notification_buffer: usize,
}

#[async_trait]
impl GattServer for SimGattServer {
    fn peer_address(&self) -> &BleAddress {
        self.peripheral.address()
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_connected()
    }

    async fn primary_services(&self) -> Result<Vec<Uuid>, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        Ok(self
            .peripheral
            .state
            .services
            .iter()
            .map(|(s, _)| *s)
            .collect())
    }

    async fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        self.peripheral.find_characteristic(service, characteristic)
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        payload: &[u8],
    ) -> Result<(), BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        let state = &self.peripheral.state;
        if !state.write_latency.is_zero() {
            tokio::time::sleep(state.write_latency).await;
        }
        let failing = state
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BleError::WriteRejected {
                characteristic: characteristic.uuid,
                reason: "simulated failure".to_string(),
            });
        }
        lock(&state.writes).push(RecordedWrite {
            service: characteristic.service,
            characteristic: characteristic.uuid,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        let (tx, rx) = mpsc::channel(self.notification_buffer);
        lock(&self.peripheral.state.subscribers)
            .entry((characteristic.service, characteristic.uuid))
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.peripheral.drop_link();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{
        CYCLING_POWER_MEASUREMENT, CYCLING_POWER_SERVICE, HEART_RATE_MEASUREMENT,
        HEART_RATE_SERVICE,
    };

    fn power_meter(network: &Arc<SimBleNetwork>) -> SimPeripheral {
        network.add_peripheral(
            SimPeripheralSpec::new("Power Meter")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT),
        )
    }

    #[tokio::test]
    async fn test_request_device_honours_filters() {
        let network = SimBleNetwork::new();
        let _pm = power_meter(&network);
        let hrm = network.add_peripheral(
            SimPeripheralSpec::new("Strap")
                .with_characteristic(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT),
        );
        let central = network.create_central();

        let found = central
            .request_device(&[DeviceFilter::new(&[HEART_RATE_SERVICE])])
            .await
            .unwrap();
        assert_eq!(found.address, *hrm.address());
        assert_eq!(found.name.as_deref(), Some("Strap"));
    }

    #[tokio::test]
    async fn test_no_matching_device() {
        let network = SimBleNetwork::new();
        let _pm = power_meter(&network);
        let central = network.create_central();

        let result = central
            .request_device(&[DeviceFilter::new(&[HEART_RATE_SERVICE])])
            .await;
        assert_eq!(result.unwrap_err(), BleError::NoDeviceFound);
    }

    #[tokio::test]
    async fn test_notifications_reach_subscribers() {
        let network = SimBleNetwork::new();
        let pm = power_meter(&network);
        let central = network.create_central();
        let found = central
            .request_device(&[DeviceFilter::new(&[CYCLING_POWER_SERVICE])])
            .await
            .unwrap();
        let server = central.connect(&found).await.unwrap();

        let handle = server
            .characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
            .await
            .unwrap();
        let mut stream = server.subscribe(&handle).await.unwrap();

        assert_eq!(
            pm.notify(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT, &[0x00, 0x00, 0xC8, 0x00]),
            1
        );
        assert_eq!(stream.recv().await.unwrap(), vec![0x00, 0x00, 0xC8, 0x00]);
    }

    #[tokio::test]
    async fn test_unknown_characteristic_is_reported() {
        let network = SimBleNetwork::new();
        let _pm = power_meter(&network);
        let central = network.create_central();
        let found = central
            .request_device(&[DeviceFilter::new(&[CYCLING_POWER_SERVICE])])
            .await
            .unwrap();
        let server = central.connect(&found).await.unwrap();

        let result = server
            .characteristic(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT)
            .await;
        assert_eq!(
            result.unwrap_err(),
            BleError::ServiceNotFound(HEART_RATE_SERVICE)
        );
    }

    #[tokio::test]
    async fn test_disconnect_closes_streams() {
        let network = SimBleNetwork::new();
        let pm = power_meter(&network);
        let central = network.create_central();
        let found = central
            .request_device(&[DeviceFilter::new(&[CYCLING_POWER_SERVICE])])
            .await
            .unwrap();
        let server = central.connect(&found).await.unwrap();
        let handle = server
            .characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
            .await
            .unwrap();
        let mut stream = server.subscribe(&handle).await.unwrap();

        server.disconnect().await.unwrap();

        assert!(!server.is_connected());
        assert!(!pm.is_connected());
        assert!(stream.recv().await.is_none());
        assert_eq!(
            server.write(&handle, &[0x00]).await.unwrap_err(),
            BleError::Disconnected
        );
    }

    #[tokio::test]
    async fn test_non_connectable_peripheral() {
        let network = SimBleNetwork::new();
        network.add_peripheral(
            SimPeripheralSpec::new("Beacon")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
                .without_gatt(),
        );
        let central = network.create_central();
        let found = central
            .request_device(&[DeviceFilter::new(&[CYCLING_POWER_SERVICE])])
            .await
            .unwrap();
        assert!(!found.connectable);
        assert!(central.connect(&found).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_latency_uses_virtual_time() {
        let network = SimBleNetwork::new();
        network.add_peripheral(
            SimPeripheralSpec::new("Slow")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
                .with_write_latency(Duration::from_millis(100)),
        );
        let central = network.create_central();
        let found = central
            .request_device(&[DeviceFilter::new(&[CYCLING_POWER_SERVICE])])
            .await
            .unwrap();
        let server = central.connect(&found).await.unwrap();
        let handle = server
            .characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
            .await
            .unwrap();

        let before = tokio::time::Instant::now();
        server.write(&handle, &[0x01]).await.unwrap();
        let elapsed = before.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
    }
}
