//! Race overview: where everyone is, as a fraction of the course.

use serde::{Deserialize, Serialize};

use super::map::RideMap;
use super::rider::{Rider, UserTypeFlags};

/// Samples taken along the course for the elevation strip.
const PROFILE_SAMPLES: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimapPositions {
    /// Elevation at every 1 % of the course, start and finish included.
    pub elevations: Vec<f64>,
    pub local: f64,
    pub humans: Vec<f64>,
    pub ai: Vec<f64>,
}

impl MinimapPositions {
    /// AI riders are listed as AI even if also flagged local.
    pub fn collect(riders: &[Rider], map: &dyn RideMap) -> Self {
        let length = map.length();
        let fraction = |rider: &Rider| {
            if length > 0.0 {
                rider.distance() / length
            } else {
                0.0
            }
        };

        let mut out = MinimapPositions {
            elevations: (0..=PROFILE_SAMPLES)
                .map(|i| map.elevation_at_distance(length * i as f64 / PROFILE_SAMPLES as f64))
                .collect(),
            ..Default::default()
        };

        for rider in riders {
            let kind = rider.user_type();
            if kind.contains(UserTypeFlags::AI) {
                out.ai.push(fraction(rider));
            } else if kind.contains(UserTypeFlags::LOCAL) {
                out.local = fraction(rider);
            } else {
                out.humans.push(fraction(rider));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::telemetry::{TelemetryRecipient, TelemetryRecorder};
    use crate::physics::ElevationMap;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[test]
    fn test_riders_are_split_by_type() {
        let start = Utc::now();
        let map = ElevationMap::new(&[(0.0, 0.0), (1000.0, 20.0)]).unwrap();
        let make = |name: &str, flags: UserTypeFlags, watts: f64| {
            let recorder = Arc::new(TelemetryRecorder::new());
            recorder.notify_power(start, watts);
            let mut rider = Rider::new(name, 75.0, 250.0, flags, recorder, start);
            let mut now = start;
            for _ in 0..4 {
                now += Duration::milliseconds(250);
                rider.tick(now, &map, &[]).unwrap();
            }
            rider
        };

        let riders = vec![
            make("me", UserTypeFlags::LOCAL, 250.0),
            make("friend", UserTypeFlags::REMOTE, 200.0),
            make("bot", UserTypeFlags::AI | UserTypeFlags::REMOTE, 300.0),
        ];
        let positions = MinimapPositions::collect(&riders, &map);

        assert_eq!(positions.elevations.len(), 101);
        assert_eq!(positions.elevations[0], 0.0);
        assert!((positions.elevations[100] - 20.0).abs() < 1e-9);
        assert!((positions.local - riders[0].distance() / 1000.0).abs() < 1e-12);
        assert_eq!(positions.humans.len(), 1);
        assert_eq!(positions.ai.len(), 1);
        assert!(positions.ai[0] > positions.humans[0]);
    }
}
