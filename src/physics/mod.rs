//! Rider physics: the per-tick longitudinal model that turns power into
//! speed and distance along a ride map.
//!
//! ```text
//! recorder.last_power ─► map.transform_power ─► F_prop = P / max(v, v_min)
//!                                                  + F_aero  = -½ρ·CdA·v²
//!                                                  + F_slope = -sgn(s)·√(sin²θ + (cosθ-1)²)  [·m·g if scaled]
//!                                                  + F_roll  = -Crr·m·g
//!                                               a = ΣF / m ; v = max(0, v + a·dt) ; x += v·dt
//! ```

pub mod map;
pub mod minimap;
pub mod rider;

pub use map::{ElevationMap, PowerTransform, RideMap};
pub use minimap::MinimapPositions;
pub use rider::{Rider, RiderDisplay, UserTypeFlags};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("Physics invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Rider id already assigned: {current}, refusing {requested}")]
    IdAlreadyAssigned { current: u64, requested: u64 },

    #[error("Invalid ride map: {0}")]
    InvalidMap(String),
}

/// Constants of the longitudinal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConstants {
    /// kg/m³
    pub air_density: f64,
    /// Drag area, m².
    pub cda: f64,
    pub rolling_coefficient: f64,
    /// m/s²
    pub gravity: f64,
    /// Speed floor used when converting power to force, m/s. Keeps a rider
    /// at a standstill from seeing infinite force.
    pub min_speed_for_power: f64,
    /// Ticks this far apart or more are treated as a stall and skipped.
    pub max_tick_seconds: f64,
    /// Multiply the geometric slope term by rider weight. Off by default,
    /// which keeps courses ridden at the same pace as existing clients.
    pub slope_scaled_by_weight: bool,
}

impl Default for PhysicsConstants {
    fn default() -> Self {
        Self {
            air_density: 1.225,
            cda: 0.25,
            rolling_coefficient: 0.0033,
            gravity: 9.81,
            min_speed_for_power: 0.5,
            max_tick_seconds: 1.0,
            slope_scaled_by_weight: false,
        }
    }
}
