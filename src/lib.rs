// TourJS - indoor cycling race core

pub mod battleship;
pub mod ble;
pub mod config;
pub mod device;
pub mod physics;

pub use config::{ConfigError, TourConfig};
pub use device::{ConnectedDevice, DeviceError, DeviceState};
pub use physics::{PhysicsError, Rider};
