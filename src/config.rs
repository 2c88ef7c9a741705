//! Runtime configuration, stored as JSON.
//!
//! Every section and field has a default, so a config file only needs the
//! values it changes:
//!
//! ```json
//! { "device": { "fake_base_watts": 250 }, "battleship": { "grid_size": 9 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ble::session::SessionConfig;
use crate::device::drivers::{DriverOptions, FakeDeviceConfig};
use crate::physics::PhysicsConstants;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TourConfig {
    pub ble: BleConfig,
    pub device: DeviceConfig,
    pub physics: PhysicsConstants,
    pub battleship: BattleshipConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub settle_delay_ms: u64,
    /// Notifications buffered per subscription before the peripheral side
    /// waits.
    pub notification_buffer: usize,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            notification_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub fake_interval_ms: u64,
    pub fake_base_watts: f64,
    pub fake_jitter_watts: f64,
    /// Rider mass sent to trainers in simulation mode.
    pub rider_mass_kg: f64,
    pub crr: f64,
    pub wind_coefficient: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let drivers = DriverOptions::default();
        let fake = FakeDeviceConfig::default();
        Self {
            fake_interval_ms: fake.interval.as_millis() as u64,
            fake_base_watts: fake.base_watts,
            fake_jitter_watts: fake.jitter_watts,
            rider_mass_kg: drivers.rider_mass_kg,
            crr: drivers.crr,
            wind_coefficient: drivers.wind_coefficient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleshipConfig {
    pub grid_size: i32,
}

impl Default for BattleshipConfig {
    fn default() -> Self {
        Self {
            grid_size: crate::battleship::DEFAULT_GRID_SIZE,
        }
    }
}

impl TourConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: TourConfig =
            serde_json::from_slice(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            settle_delay: Duration::from_millis(self.ble.settle_delay_ms),
        }
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            rider_mass_kg: self.device.rider_mass_kg,
            crr: self.device.crr,
            wind_coefficient: self.device.wind_coefficient,
        }
    }

    pub fn fake_device_config(&self) -> FakeDeviceConfig {
        FakeDeviceConfig {
            interval: Duration::from_millis(self.device.fake_interval_ms.max(1)),
            base_watts: self.device.fake_base_watts,
            jitter_watts: self.device.fake_jitter_watts,
            ..FakeDeviceConfig::default()
        }
    }
}
