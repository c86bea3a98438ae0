use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::filters::{FilterState, KalmanConfig, PositionFilter};
use crate::types::{ValidatedFix, VehicleId, VehicleIdentity, AXIS_LAT, AXIS_LNG};

/// A position tagged with the timestamp of the fix it came from
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl TrajectoryPoint {
    fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Raw and filtered path of one vehicle.
///
/// `raw_positions`, `filtered_positions` and `timestamps` are index-aligned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub vehicle_id: VehicleId,
    pub name: String,
    pub number: String,
    pub category: String,
    pub raw_positions: Vec<TrajectoryPoint>,
    pub filtered_positions: Vec<TrajectoryPoint>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub summary: TrajectorySummary,
}

impl Trajectory {
    pub fn empty(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            name: String::new(),
            number: String::new(),
            category: String::new(),
            raw_positions: Vec::new(),
            filtered_positions: Vec::new(),
            timestamps: Vec::new(),
            summary: TrajectorySummary::default(),
        }
    }

    /// Attach display fields from the vehicle feed
    pub fn identified(mut self, identity: &VehicleIdentity) -> Self {
        self.name = identity.display_name.clone();
        self.number = identity.number.clone();
        self.category = identity.category.clone();
        self
    }

    /// Append a continuation produced by a resumed assembler
    pub fn append(&mut self, tail: Trajectory) {
        self.raw_positions.extend(tail.raw_positions);
        self.filtered_positions.extend(tail.filtered_positions);
        self.timestamps.extend(tail.timestamps);
        self.summary = TrajectorySummary::from_positions(
            &self.raw_positions,
            &self.filtered_positions,
            &self.timestamps,
        );
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Derived figures for display
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySummary {
    pub fix_count: usize,
    pub span_seconds: f64,
    pub raw_distance_m: f64,
    pub filtered_distance_m: f64,
}

impl TrajectorySummary {
    pub fn from_positions(
        raw: &[TrajectoryPoint],
        filtered: &[TrajectoryPoint],
        timestamps: &[DateTime<Utc>],
    ) -> Self {
        let span_seconds = match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        Self {
            fix_count: timestamps.len(),
            span_seconds,
            raw_distance_m: path_length_m(raw),
            filtered_distance_m: path_length_m(filtered),
        }
    }
}

/// Great-circle length of a polyline, in metres
pub fn path_length_m(points: &[TrajectoryPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].to_point().haversine_distance(&pair[1].to_point()))
        .sum()
}

/// Where an assembler left off: enough to continue filtering later
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssemblerCheckpoint {
    pub state: FilterState,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Drives the position filter over one vehicle's ordered fixes
pub struct TrajectoryAssembler {
    vehicle_id: VehicleId,
    filter: PositionFilter,
    last_timestamp: Option<DateTime<Utc>>,
    raw_positions: Vec<TrajectoryPoint>,
    filtered_positions: Vec<TrajectoryPoint>,
    timestamps: Vec<DateTime<Utc>>,
}

impl TrajectoryAssembler {
    pub fn new(vehicle_id: VehicleId, config: KalmanConfig) -> Self {
        Self {
            vehicle_id,
            filter: PositionFilter::new(config),
            last_timestamp: None,
            raw_positions: Vec::new(),
            filtered_positions: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Continue from a checkpoint; the new trajectory only holds fixes fed from here on
    pub fn resume(
        vehicle_id: VehicleId,
        config: KalmanConfig,
        checkpoint: AssemblerCheckpoint,
    ) -> Self {
        Self {
            vehicle_id,
            filter: PositionFilter::resume(config, checkpoint.state),
            last_timestamp: checkpoint.last_timestamp,
            raw_positions: Vec::new(),
            filtered_positions: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Feed one fix; fixes must arrive in non-decreasing timestamp order
    pub fn push(&mut self, fix: &ValidatedFix) -> TrajectoryPoint {
        let dt = match self.last_timestamp {
            Some(last) => (fix.timestamp - last).num_milliseconds() as f64 / 1000.0,
            None => self.filter.config().default_dt,
        };
        let estimate = self.filter.update(fix.position(), dt).estimate;

        let filtered = TrajectoryPoint {
            latitude: estimate[AXIS_LAT],
            longitude: estimate[AXIS_LNG],
            timestamp: fix.timestamp,
        };
        self.raw_positions.push(TrajectoryPoint {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
        });
        self.filtered_positions.push(filtered);
        self.timestamps.push(fix.timestamp);
        self.last_timestamp = Some(fix.timestamp);
        filtered
    }

    pub fn extend<'a>(&mut self, fixes: impl IntoIterator<Item = &'a ValidatedFix>) {
        for fix in fixes {
            self.push(fix);
        }
    }

    pub fn checkpoint(&self) -> AssemblerCheckpoint {
        AssemblerCheckpoint {
            state: *self.filter.state(),
            last_timestamp: self.last_timestamp,
        }
    }

    pub fn finish(self) -> Trajectory {
        let summary = TrajectorySummary::from_positions(
            &self.raw_positions,
            &self.filtered_positions,
            &self.timestamps,
        );
        Trajectory {
            summary,
            raw_positions: self.raw_positions,
            filtered_positions: self.filtered_positions,
            timestamps: self.timestamps,
            ..Trajectory::empty(self.vehicle_id)
        }
    }
}

/// Smooth one vehicle's validated fixes with a fresh filter
pub fn assemble(
    vehicle_id: &VehicleId,
    fixes: &[ValidatedFix],
    config: &KalmanConfig,
) -> Trajectory {
    let mut assembler = TrajectoryAssembler::new(vehicle_id.clone(), config.clone());
    assembler.extend(fixes);
    assembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fix(secs: i64, lat: f64, lng: f64) -> ValidatedFix {
        ValidatedFix {
            vehicle_id: VehicleId::from("1"),
            timestamp: Utc.timestamp_opt(1_746_000_000 + secs, 0).unwrap(),
            latitude: lat,
            longitude: lng,
        }
    }

    fn noisy_track(n: usize) -> Vec<ValidatedFix> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..n)
            .map(|i| {
                let noise = rng.gen_range(-0.5e-4..0.5e-4);
                fix(i as i64 * 3, -6.9 + i as f64 * 1e-5 + noise, 107.6 - noise)
            })
            .collect()
    }

    #[test]
    fn test_empty_sequence() {
        let trajectory = assemble(&VehicleId::from("1"), &[], &KalmanConfig::default());
        assert!(trajectory.is_empty());
        assert!(trajectory.raw_positions.is_empty());
        assert!(trajectory.filtered_positions.is_empty());
        assert_eq!(trajectory.summary, TrajectorySummary::default());
    }

    #[test]
    fn test_single_fix_passes_through() {
        let trajectory = assemble(
            &VehicleId::from("1"),
            &[fix(0, -6.9, 107.6)],
            &KalmanConfig::default(),
        );
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.filtered_positions[0], trajectory.raw_positions[0]);
    }

    #[test]
    fn test_arrays_aligned() {
        let fixes = noisy_track(25);
        let trajectory = assemble(&VehicleId::from("1"), &fixes, &KalmanConfig::default());
        assert_eq!(trajectory.raw_positions.len(), 25);
        assert_eq!(trajectory.filtered_positions.len(), 25);
        assert_eq!(trajectory.timestamps.len(), 25);
        for i in 0..25 {
            assert_eq!(trajectory.raw_positions[i].timestamp, trajectory.timestamps[i]);
            assert_eq!(trajectory.filtered_positions[i].timestamp, trajectory.timestamps[i]);
            assert_eq!(trajectory.raw_positions[i].latitude, fixes[i].latitude);
        }
    }

    #[test]
    fn test_deterministic() {
        let fixes = noisy_track(40);
        let config = KalmanConfig::default();
        let a = assemble(&VehicleId::from("1"), &fixes, &config);
        let b = assemble(&VehicleId::from("1"), &fixes, &config);
        for (p, q) in a.filtered_positions.iter().zip(&b.filtered_positions) {
            assert_eq!(p.latitude.to_bits(), q.latitude.to_bits());
            assert_eq!(p.longitude.to_bits(), q.longitude.to_bits());
        }
    }

    #[test]
    fn test_chunked_feed_matches_full_history() {
        let fixes = noisy_track(30);
        let config = KalmanConfig::default();
        let full = assemble(&VehicleId::from("1"), &fixes, &config);

        let mut assembler = TrajectoryAssembler::new(VehicleId::from("1"), config.clone());
        assembler.extend(&fixes[..7]);
        assembler.extend(&fixes[7..19]);
        assembler.extend(&fixes[19..]);
        assert_eq!(assembler.finish(), full);
    }

    #[test]
    fn test_resume_from_checkpoint_matches_full_history() {
        let fixes = noisy_track(30);
        let config = KalmanConfig::default();
        let full = assemble(&VehicleId::from("1"), &fixes, &config);

        let mut first = TrajectoryAssembler::new(VehicleId::from("1"), config.clone());
        first.extend(&fixes[..12]);
        let checkpoint = first.checkpoint();
        assert_eq!(checkpoint.last_timestamp, Some(fixes[11].timestamp));

        let mut second = TrajectoryAssembler::resume(VehicleId::from("1"), config, checkpoint);
        second.extend(&fixes[12..]);
        let tail = second.finish();

        assert_eq!(tail.filtered_positions, full.filtered_positions[12..].to_vec());
    }

    #[test]
    fn test_filtered_path_is_shorter() {
        let fixes = noisy_track(60);
        let trajectory = assemble(&VehicleId::from("1"), &fixes, &KalmanConfig::default());
        let summary = &trajectory.summary;
        assert_eq!(summary.fix_count, 60);
        assert_abs_diff_eq!(summary.span_seconds, 177.0);
        assert!(summary.filtered_distance_m < summary.raw_distance_m);
    }

    #[test]
    fn test_path_length_one_degree_of_latitude() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let points = [
            TrajectoryPoint {
                latitude: 0.0,
                longitude: 0.0,
                timestamp: t,
            },
            TrajectoryPoint {
                latitude: 1.0,
                longitude: 0.0,
                timestamp: t,
            },
        ];
        // ~111.2 km on the mean-radius sphere
        assert!((path_length_m(&points) - 111_195.0).abs() < 10.0);
    }
}
