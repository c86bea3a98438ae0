//! Fleet-wide orchestration: group every fix, then smooth each vehicle
//!
//! Every entry point re-derives trajectories from the complete history it is
//! given, so identical inputs give identical output. [`FleetTracker`] keeps
//! per-vehicle filter state between refreshes and only filters fixes it has
//! not seen, falling back to a full pass whenever the history was rewritten.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::filters::KalmanConfig;
use crate::grouping::{group_with_report, GroupedFixes, GroupingReport};
use crate::trajectory::{assemble, AssemblerCheckpoint, Trajectory, TrajectoryAssembler};
use crate::types::{RawFix, ValidatedFix, VehicleId, VehicleIdentity};

/// Trajectories plus the grouping bookkeeping of the same pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub trajectories: Vec<Trajectory>,
    pub report: GroupingReport,
}

/// One trajectory per vehicle, in vehicle feed order
pub fn process(
    vehicles: &[VehicleIdentity],
    fixes: &[RawFix],
    config: &KalmanConfig,
) -> Vec<Trajectory> {
    process_with_report(vehicles, fixes, config).trajectories
}

pub fn process_with_report(
    vehicles: &[VehicleIdentity],
    fixes: &[RawFix],
    config: &KalmanConfig,
) -> ProcessOutput {
    let (grouped, report) = group_with_report(vehicles, fixes);
    let trajectories = smooth_all(vehicles, &grouped, config);
    log::debug!(
        "processed {} vehicles, {}/{} fixes accepted",
        trajectories.len(),
        report.accepted,
        report.received
    );
    ProcessOutput {
        trajectories,
        report,
    }
}

/// Same output as [`process_with_report`], with vehicles split across `workers` threads
pub fn process_parallel(
    vehicles: &[VehicleIdentity],
    fixes: &[RawFix],
    config: &KalmanConfig,
    workers: usize,
) -> ProcessOutput {
    let (grouped, report) = group_with_report(vehicles, fixes);
    let workers = workers.clamp(1, vehicles.len().max(1));
    if workers == 1 {
        return ProcessOutput {
            trajectories: smooth_all(vehicles, &grouped, config),
            report,
        };
    }

    let batch_size = vehicles.len().div_ceil(workers);
    let grouped_ref = &grouped;
    let joined = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = vehicles
            .chunks(batch_size)
            .map(|batch| s.spawn(move |_| smooth_all(batch, grouped_ref, config)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<_>, _>>()
    });

    let trajectories = match joined {
        Ok(Ok(batches)) => batches.into_iter().flatten().collect(),
        _ => {
            log::error!("worker thread panicked, smoothing sequentially");
            smooth_all(vehicles, &grouped, config)
        }
    };

    ProcessOutput {
        trajectories,
        report,
    }
}

fn smooth_all(
    vehicles: &[VehicleIdentity],
    grouped: &GroupedFixes,
    config: &KalmanConfig,
) -> Vec<Trajectory> {
    vehicles
        .iter()
        .map(|vehicle| {
            let fixes = grouped.get(&vehicle.id).map(Vec::as_slice).unwrap_or(&[]);
            assemble(&vehicle.id, fixes, config).identified(vehicle)
        })
        .collect()
}

struct VehicleTrack {
    checkpoint: AssemblerCheckpoint,
    trajectory: Trajectory,
}

/// Refresh-to-refresh tracker that reuses filter state.
///
/// Output of [`FleetTracker::refresh`] always equals [`process`] over the same
/// inputs.
pub struct FleetTracker {
    config: KalmanConfig,
    tracks: HashMap<VehicleId, VehicleTrack>,
}

/// How one refresh was served
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshStats {
    /// Vehicles that only had new fixes appended
    pub resumed: usize,
    /// Vehicles filtered from scratch
    pub rebuilt: usize,
    /// Fixes pushed through the filter during this refresh
    pub filtered_fixes: usize,
}

impl FleetTracker {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    pub fn tracked_vehicles(&self) -> usize {
        self.tracks.len()
    }

    pub fn refresh(
        &mut self,
        vehicles: &[VehicleIdentity],
        fixes: &[RawFix],
    ) -> (ProcessOutput, RefreshStats) {
        let (grouped, report) = group_with_report(vehicles, fixes);
        let mut stats = RefreshStats::default();
        let mut next: HashMap<VehicleId, VehicleTrack> = HashMap::with_capacity(vehicles.len());
        let mut trajectories = Vec::with_capacity(vehicles.len());

        for vehicle in vehicles {
            let history = grouped.get(&vehicle.id).map(Vec::as_slice).unwrap_or(&[]);
            let previous = self
                .tracks
                .remove(&vehicle.id)
                .or_else(|| next.remove(&vehicle.id));

            let track = match previous {
                Some(track) if is_prefix(&track.trajectory, history) => {
                    let seen = track.trajectory.len();
                    stats.resumed += 1;
                    stats.filtered_fixes += history.len() - seen;
                    self.extend_track(track, &history[seen..])
                }
                _ => {
                    stats.rebuilt += 1;
                    stats.filtered_fixes += history.len();
                    let mut assembler =
                        TrajectoryAssembler::new(vehicle.id.clone(), self.config.clone());
                    assembler.extend(history);
                    VehicleTrack {
                        checkpoint: assembler.checkpoint(),
                        trajectory: assembler.finish(),
                    }
                }
            };

            trajectories.push(track.trajectory.clone().identified(vehicle));
            next.insert(vehicle.id.clone(), track);
        }

        self.tracks = next;
        log::debug!(
            "refresh: {} resumed, {} rebuilt, {} fixes filtered",
            stats.resumed,
            stats.rebuilt,
            stats.filtered_fixes
        );

        (
            ProcessOutput {
                trajectories,
                report,
            },
            stats,
        )
    }

    fn extend_track(&self, track: VehicleTrack, new_fixes: &[ValidatedFix]) -> VehicleTrack {
        if new_fixes.is_empty() {
            return track;
        }
        let mut assembler = TrajectoryAssembler::resume(
            track.trajectory.vehicle_id.clone(),
            self.config.clone(),
            track.checkpoint,
        );
        assembler.extend(new_fixes);
        let checkpoint = assembler.checkpoint();
        let mut trajectory = track.trajectory;
        trajectory.append(assembler.finish());
        VehicleTrack {
            checkpoint,
            trajectory,
        }
    }
}

/// True when the already-filtered fixes are exactly the head of `history`
fn is_prefix(trajectory: &Trajectory, history: &[ValidatedFix]) -> bool {
    trajectory.len() <= history.len()
        && trajectory
            .raw_positions
            .iter()
            .zip(history)
            .all(|(seen, fix)| {
                seen.timestamp == fix.timestamp
                    && seen.latitude.to_bits() == fix.latitude.to_bits()
                    && seen.longitude.to_bits() == fix.longitude.to_bits()
            })
}
