//! Concrete device drivers and the plumbing they share.
//!
//! Every GATT driver is a thin layer over `GattDeviceCore`, which owns the
//! session, the telemetry hub and the notification pumps. A driver only
//! supplies decoders (bytes → telemetry) and payload builders (command →
//! bytes).

pub mod cps;
pub mod fake;
pub mod ftms;
pub mod hrm;
pub mod kickr;

pub use cps::CyclingPowerDevice;
pub use fake::{FakeDevice, FakeDeviceConfig};
pub use ftms::FtmsDevice;
pub use hrm::HeartRateDevice;
pub use kickr::KickrDevice;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::telemetry::{TelemetryEvent, TelemetryHub};
use super::{DeviceError, DeviceState, StateCell};
use crate::ble::gatt::service_name;
use crate::ble::session::GattSession;

/// Rider and trainer parameters drivers need for simulation-mode commands.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    pub rider_mass_kg: f64,
    pub crr: f64,
    /// Wind resistance coefficient, kg/m.
    pub wind_coefficient: f64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            rider_mass_kg: 75.0,
            crr: 0.004,
            wind_coefficient: 0.51,
        }
    }
}

/// Turns one notification payload into zero or more telemetry events.
/// Malformed payloads yield nothing; the decoder keeps any state it needs
/// between notifications (crank counters and the like).
pub trait NotificationDecoder: Send + 'static {
    fn decode(&mut self, timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<TelemetryEvent>;
}

/// Little-endian cursor over a notification payload. Every read returns
/// `None` once the payload runs out.
pub struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(n)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.take(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Option<u32> {
        self.take(3).map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Skip a field we do not use.
    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }
}

/// A decoder that only logs what it receives. Used for control point
/// indications, whose responses carry no telemetry.
pub struct ResponseLogger {
    pub label: &'static str,
}

impl NotificationDecoder for ResponseLogger {
    fn decode(&mut self, _timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<TelemetryEvent> {
        log::debug!("{} response: {}", self.label, hex::encode(payload));
        Vec::new()
    }
}

/// State and plumbing shared by every GATT-backed driver.
pub struct GattDeviceCore {
    session: Arc<GattSession>,
    hub: Arc<TelemetryHub>,
    state: Arc<StateCell>,
    name: String,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl GattDeviceCore {
    pub fn new(session: Arc<GattSession>, name: impl Into<String>) -> Self {
        Self {
            session,
            hub: Arc::new(TelemetryHub::new()),
            state: Arc::new(StateCell::new(DeviceState::Connecting)),
            name: name.into(),
            pumps: Mutex::new(Vec::new()),
        }
    }

    pub fn device_id(&self) -> String {
        self.session.peer_address().to_string()
    }

    pub fn name(&self) -> String {
        self.name.clone()
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn telemetry(&self) -> &TelemetryHub {
        &self.hub
    }

    pub fn session(&self) -> &Arc<GattSession> {
        &self.session
    }

    /// Subscribe to a characteristic and decode every notification on a
    /// dedicated pump task. Events are dispatched as soon as each payload
    /// is decoded. When the stream closes the device becomes
    /// `Disconnected`.
    pub async fn monitor<D: NotificationDecoder>(
        &self,
        service: Uuid,
        characteristic: Uuid,
        mut decoder: D,
    ) -> Result<(), DeviceError> {
        let mut stream = self.session.subscribe(service, characteristic).await?;
        let hub = Arc::clone(&self.hub);
        let state = Arc::clone(&self.state);
        let peer = self.device_id();

        let pump = tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                log::debug!(
                    "notify {}/{} -> {}",
                    service_name(&service),
                    characteristic,
                    hex::encode(&payload)
                );
                for event in decoder.decode(Utc::now(), &payload) {
                    hub.dispatch(event);
                }
            }
            if state.transition(DeviceState::Ok, DeviceState::Disconnected)
                || state.transition(DeviceState::Connecting, DeviceState::Disconnected)
            {
                log::info!("{} notifications ended; device disconnected", peer);
            }
        });

        self.pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(pump);
        Ok(())
    }

    /// Startup finished: the device now accepts commands.
    pub fn mark_ready(&self) {
        if self.state.transition(DeviceState::Connecting, DeviceState::Ok) {
            log::info!("{} ({}) ready", self.name, self.device_id());
        }
    }

    /// Startup failed; the device is unusable.
    pub fn mark_failed(&self) {
        self.state.set(DeviceState::Error);
    }

    /// Queue a command write. Rejected up front unless the device is ready;
    /// nothing is queued for later.
    pub async fn command(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<bool, DeviceError> {
        match self.state.get() {
            DeviceState::Ok => {}
            other => return Err(DeviceError::NotReady(other)),
        }
        self.session
            .enqueue_write(service, characteristic, payload)
            .await?;
        Ok(true)
    }

    /// Write during startup, before the device is marked ready.
    pub async fn startup_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), DeviceError> {
        self.session
            .enqueue_write(service, characteristic, payload)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        self.stop_pumps();
        self.state.set(DeviceState::Disconnected);
        self.session.disconnect().await?;
        Ok(())
    }

    fn stop_pumps(&self) {
        let pumps = std::mem::take(
            &mut *self
                .pumps
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for pump in pumps {
            pump.abort();
        }
    }
}

impl Drop for GattDeviceCore {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}
