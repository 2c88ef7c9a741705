//! A rider and the physics tick that moves it along a map.

use std::ops::BitOr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::map::RideMap;
use super::{PhysicsConstants, PhysicsError};
use crate::device::TelemetryRecorder;

/// Who controls a rider. Combinable bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserTypeFlags(u8);

impl UserTypeFlags {
    pub const LOCAL: UserTypeFlags = UserTypeFlags(1);
    pub const REMOTE: UserTypeFlags = UserTypeFlags(2);
    pub const AI: UserTypeFlags = UserTypeFlags(4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: UserTypeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UserTypeFlags {
    type Output = UserTypeFlags;

    fn bitor(self, rhs: UserTypeFlags) -> UserTypeFlags {
        UserTypeFlags(self.0 | rhs.0)
    }
}

/// Pre-formatted rider status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderDisplay {
    pub name: String,
    pub last_power: String,
    pub distance: String,
    pub speed: String,
}

pub struct Rider {
    name: String,
    mass_kg: f64,
    handicap: f64,
    type_flags: UserTypeFlags,
    recorder: Arc<TelemetryRecorder>,
    id: Option<u64>,
    constants: PhysicsConstants,

    last_tick: DateTime<Utc>,
    speed: f64,
    position: f64,
}

/// Kinematic state a tick would commit.
struct TickOutcome {
    speed: f64,
    position: f64,
}

impl Rider {
    /// `created_at` seeds the tick clock; the first tick measures from it.
    pub fn new(
        name: impl Into<String>,
        mass_kg: f64,
        handicap: f64,
        type_flags: UserTypeFlags,
        recorder: Arc<TelemetryRecorder>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            mass_kg,
            handicap,
            type_flags,
            recorder,
            id: None,
            constants: PhysicsConstants::default(),
            last_tick: created_at,
            speed: 0.0,
            position: 0.0,
        }
    }

    pub fn with_constants(mut self, constants: PhysicsConstants) -> Self {
        self.constants = constants;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mass_kg(&self) -> f64 {
        self.mass_kg
    }

    pub fn handicap(&self) -> f64 {
        self.handicap
    }

    pub fn user_type(&self) -> UserTypeFlags {
        self.type_flags
    }

    pub fn recorder(&self) -> &Arc<TelemetryRecorder> {
        &self.recorder
    }

    pub fn last_power(&self) -> f64 {
        self.recorder.last_power()
    }

    /// Metres per second.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Metres along the map.
    pub fn distance(&self) -> f64 {
        self.position
    }

    pub fn last_tick(&self) -> DateTime<Utc> {
        self.last_tick
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Record the server-assigned id. Assigning the same id again is
    /// harmless; a different one is refused.
    pub fn assign_id(&mut self, id: u64) -> Result<(), PhysicsError> {
        match self.id {
            Some(current) if current != id => {
                log::error!("{}: id {} already assigned, refusing {}", self.name, current, id);
                Err(PhysicsError::IdAlreadyAssigned {
                    current,
                    requested: id,
                })
            }
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Advance the rider to `now`.
    ///
    /// A tick that is out of order or arrives a second or more after the
    /// previous one only resynchronizes the clock; speed and position are
    /// untouched. If any force invariant fails, nothing is committed.
    /// `_other_riders` is reserved for drafting.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        map: &dyn RideMap,
        _other_riders: &[Rider],
    ) -> Result<(), PhysicsError> {
        let dt = (now - self.last_tick)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0);

        let dt = match dt {
            Some(dt) if dt >= 0.0 && dt < self.constants.max_tick_seconds => dt,
            _ => {
                log::debug!(
                    "{}: tick outside window ({:?}s), resynchronizing",
                    self.name,
                    dt
                );
                self.last_tick = now;
                return Ok(());
            }
        };

        let outcome = self.integrate(dt, map).map_err(|e| {
            log::error!("{}: {}", self.name, e);
            e
        })?;
        self.speed = outcome.speed;
        self.position = outcome.position;
        self.last_tick = now;
        Ok(())
    }

    fn integrate(&self, dt: f64, map: &dyn RideMap) -> Result<TickOutcome, PhysicsError> {
        let c = &self.constants;
        let weight = self.mass_kg * c.gravity;

        let power = map.transform_power(self, self.last_power());
        let power_force = power / self.speed.max(c.min_speed_for_power);
        let aero_force = -0.5 * c.air_density * c.cda * self.speed * self.speed;

        let slope_force = self.slope_force(map.slope_at_distance(self.position));

        let rolling_force = -c.rolling_coefficient * weight;

        if !(rolling_force <= 0.0) {
            return Err(PhysicsError::InvariantViolation(format!(
                "rolling force {} is positive",
                rolling_force
            )));
        }
        if !(aero_force <= 0.0) {
            return Err(PhysicsError::InvariantViolation(format!(
                "aero force {} is positive",
                aero_force
            )));
        }

        let total_force = power_force + aero_force + slope_force + rolling_force;
        let accel = total_force / self.mass_kg;
        let speed = self.speed + accel * dt;
        if !speed.is_finite() {
            return Err(PhysicsError::InvariantViolation(format!(
                "speed diverged (accel {}, dt {})",
                accel, dt
            )));
        }
        let speed = speed.max(0.0);

        log::trace!(
            "{}: F={:.2} (P {:.2} aero {:.2} slope {:.2} roll {:.2}) a={:.3} v={:.3}",
            self.name,
            total_force,
            power_force,
            aero_force,
            slope_force,
            rolling_force,
            accel,
            speed
        );

        Ok(TickOutcome {
            speed,
            position: self.position + speed * dt,
        })
    }

    /// Resistance from the grade: negative uphill, positive downhill.
    fn slope_force(&self, slope: f64) -> f64 {
        let theta = slope.atan();
        let grade_term = (theta.sin().powi(2) + (theta.cos() - 1.0).powi(2)).sqrt();
        let force = -slope.signum() * grade_term;
        if self.constants.slope_scaled_by_weight {
            force * self.mass_kg * self.constants.gravity
        } else {
            force
        }
    }

    pub fn display(&self) -> RiderDisplay {
        RiderDisplay {
            name: self.name.clone(),
            last_power: format!("{:.0}W", self.last_power()),
            distance: format!("{:.0}m", self.position),
            speed: format!("{:.1}km/h", self.speed * 3.6),
        }
    }
}
