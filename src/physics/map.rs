//! Ride maps: the course a rider is ticked along.

use serde::{Deserialize, Serialize};

use super::rider::Rider;
use super::PhysicsError;

/// The view of a course the physics tick needs.
pub trait RideMap {
    /// Rise over run at a distance along the course (0.05 = 5 %).
    fn slope_at_distance(&self, distance_m: f64) -> f64;

    fn elevation_at_distance(&self, distance_m: f64) -> f64;

    /// Total course length, metres.
    fn length(&self) -> f64;

    /// Adjust a rider's measured power before it enters the model.
    fn transform_power(&self, _rider: &Rider, watts: f64) -> f64 {
        watts
    }
}

/// How a map adjusts measured power.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PowerTransform {
    #[default]
    Identity,
    /// Scale power by `reference / rider handicap`, so riders race as if
    /// they all had the reference FTP.
    #[serde(rename_all = "camelCase")]
    Handicap { reference_watts: f64 },
}

impl PowerTransform {
    pub fn apply(&self, rider: &Rider, watts: f64) -> f64 {
        match *self {
            PowerTransform::Identity => watts,
            PowerTransform::Handicap { reference_watts } => {
                let handicap = rider.handicap();
                if handicap > 0.0 {
                    watts * reference_watts / handicap
                } else {
                    watts
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationPoint {
    pub distance: f64,
    pub elevation: f64,
}

/// A piecewise-linear elevation profile. Outside the profile the first or
/// last segment is extended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ElevationMapRepr")]
pub struct ElevationMap {
    points: Vec<ElevationPoint>,
    power_transform: PowerTransform,
}

/// Unvalidated wire form of `ElevationMap`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElevationMapRepr {
    points: Vec<ElevationPoint>,
    #[serde(default)]
    power_transform: PowerTransform,
}

impl TryFrom<ElevationMapRepr> for ElevationMap {
    type Error = PhysicsError;

    fn try_from(repr: ElevationMapRepr) -> Result<Self, Self::Error> {
        let points: Vec<(f64, f64)> = repr
            .points
            .iter()
            .map(|p| (p.distance, p.elevation))
            .collect();
        Ok(Self::new(&points)?.with_power_transform(repr.power_transform))
    }
}

impl ElevationMap {
    /// `points` are (distance m, elevation m) pairs with strictly increasing
    /// distances.
    pub fn new(points: &[(f64, f64)]) -> Result<Self, PhysicsError> {
        if points.len() < 2 {
            return Err(PhysicsError::InvalidMap(format!(
                "need at least two points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|(d, e)| !d.is_finite() || !e.is_finite()) {
            return Err(PhysicsError::InvalidMap("non-finite point".to_string()));
        }
        if let Some(w) = points.windows(2).find(|w| w[1].0 <= w[0].0) {
            return Err(PhysicsError::InvalidMap(format!(
                "distances must increase ({} then {})",
                w[0].0, w[1].0
            )));
        }

        Ok(Self {
            points: points
                .iter()
                .map(|&(distance, elevation)| ElevationPoint {
                    distance,
                    elevation,
                })
                .collect(),
            power_transform: PowerTransform::Identity,
        })
    }

    /// A flat course of the given length.
    pub fn flat(length_m: f64) -> Result<Self, PhysicsError> {
        Self::new(&[(0.0, 0.0), (length_m, 0.0)])
    }

    /// A constant-grade course.
    pub fn constant_slope(length_m: f64, slope: f64) -> Result<Self, PhysicsError> {
        Self::new(&[(0.0, 0.0), (length_m, length_m * slope)])
    }

    pub fn with_power_transform(mut self, transform: PowerTransform) -> Self {
        self.power_transform = transform;
        self
    }

    pub fn points(&self) -> &[ElevationPoint] {
        &self.points
    }

    /// The segment containing `distance`, clamped to the ends.
    fn segment(&self, distance: f64) -> (ElevationPoint, ElevationPoint) {
        let idx = self
            .points
            .partition_point(|p| p.distance <= distance)
            .clamp(1, self.points.len() - 1);
        (self.points[idx - 1], self.points[idx])
    }
}

impl RideMap for ElevationMap {
    fn slope_at_distance(&self, distance_m: f64) -> f64 {
        let (a, b) = self.segment(distance_m);
        (b.elevation - a.elevation) / (b.distance - a.distance)
    }

    fn elevation_at_distance(&self, distance_m: f64) -> f64 {
        let (a, b) = self.segment(distance_m);
        let slope = (b.elevation - a.elevation) / (b.distance - a.distance);
        a.elevation + (distance_m - a.distance) * slope
    }

    fn length(&self) -> f64 {
        self.points
            .last()
            .map(|p| p.distance)
            .unwrap_or_default()
    }

    fn transform_power(&self, rider: &Rider, watts: f64) -> f64 {
        self.power_transform.apply(rider, watts)
    }
}
