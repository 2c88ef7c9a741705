//! device/mod.rs
//!
//! Connected fitness devices: the uniform capability interface the rest of
//! the application consumes, plus discovery, classification and the
//! concrete drivers behind it.
//!
//! # Acquisition sequence
//!
//! ```text
//! DeviceFactory::find_powermeter / find_hrm
//!   ↓ request device (service filters)
//! connect GATT
//!   ↓ fresh GattSession (new write queue + empty characteristic cache)
//! enumerate primary services
//!   ↓ classify: FTMS > Kickr > CPS > HRM
//! driver subscribes to notifications, then accepts commands
//!   ↓
//! Arc<dyn ConnectedDevice>
//! ```

pub mod classifier;
pub mod drivers;
pub mod factory;
pub mod registry;
pub mod telemetry;

pub use classifier::{classify, DriverKind};
pub use factory::DeviceFactory;
pub use registry::{DeviceFlags, LocalDevices};
pub use telemetry::{
    MetricKind, TelemetryEvent, TelemetryHub, TelemetryRecipient, TelemetryRecorder,
};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ble::BleError;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No GATT server available on the selected device")]
    NoGatt,

    #[error("Unrecognized device: none of the advertised services are supported")]
    UnrecognizedDevice,

    #[error("Device is not ready for commands (state: {0})")]
    NotReady(DeviceState),

    #[error("Transport error: {0}")]
    Transport(#[from] BleError),
}

impl DeviceError {
    /// Transport and classification failures are worth offering the user a
    /// "try connecting again"; anything else is a usage bug.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::NoGatt | DeviceError::UnrecognizedDevice | DeviceError::Transport(_)
        )
    }
}

/// Lifecycle state of a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Connecting,
    Ok,
    Disconnected,
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Connecting => "connecting",
            DeviceState::Ok => "ok",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lock-free holder for a `DeviceState`, shared with notification pumps.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: DeviceState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    pub fn get(&self) -> DeviceState {
        match self.0.load(Ordering::SeqCst) {
            0 => DeviceState::Connecting,
            1 => DeviceState::Ok,
            2 => DeviceState::Disconnected,
            _ => DeviceState::Error,
        }
    }

    pub fn set(&self, state: DeviceState) {
        self.0.store(Self::encode(state), Ordering::SeqCst);
    }

    /// Move to `to` only if currently in `from`. Returns true on success.
    pub fn transition(&self, from: DeviceState, to: DeviceState) -> bool {
        self.0
            .compare_exchange(
                Self::encode(from),
                Self::encode(to),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn encode(state: DeviceState) -> u8 {
        match state {
            DeviceState::Connecting => 0,
            DeviceState::Ok => 1,
            DeviceState::Disconnected => 2,
            DeviceState::Error => 3,
        }
    }
}

/// The capability interface every device variant implements.
///
/// Commands report whether the underlying protocol accepted them. A device
/// that does not support a command resolves it to `Ok(false)`; errors are
/// reserved for transport failures and for commands issued before the
/// device is ready.
#[async_trait]
pub trait ConnectedDevice: Send + Sync {
    fn device_id(&self) -> String;

    fn state(&self) -> DeviceState;

    fn name(&self) -> String;

    /// Short text such as "Bluetooth FTMS" for status displays.
    fn type_description(&self) -> &'static str;

    fn has_power(&self) -> bool;

    fn has_cadence(&self) -> bool;

    fn has_hrm(&self) -> bool;

    /// Where this device publishes its telemetry.
    fn telemetry(&self) -> &TelemetryHub;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Hold a constant target power.
    async fn update_erg(&self, _watts: f64) -> Result<bool, DeviceError> {
        Ok(false)
    }

    /// Simulate a grade, in percent.
    async fn update_slope(&self, _slope_pct: f64) -> Result<bool, DeviceError> {
        Ok(false)
    }

    /// Set a mechanical resistance level, in percent of maximum.
    async fn update_resistance(&self, _resistance_pct: f64) -> Result<bool, DeviceError> {
        Ok(false)
    }
}
