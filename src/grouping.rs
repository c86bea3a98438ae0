use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{RawFix, ValidatedFix, VehicleId, VehicleIdentity};
use crate::validate;

/// Validated fixes per vehicle, each sequence in non-decreasing timestamp order
pub type GroupedFixes = HashMap<VehicleId, Vec<ValidatedFix>>;

/// Bookkeeping from one grouping pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingReport {
    /// Fixes on the coordinate feed
    pub received: usize,
    /// Fixes assigned to a known vehicle after validation
    pub accepted: usize,
    /// Fixes for a known vehicle that failed validation
    pub invalid: usize,
    /// Fixes whose vehicle id is not on the vehicle feed
    pub orphaned: usize,
}

/// Join fixes to vehicles by id, validate, and order each vehicle's fixes
pub fn group(vehicles: &[VehicleIdentity], fixes: &[RawFix]) -> GroupedFixes {
    group_with_report(vehicles, fixes).0
}

/// Same as [`group`], also counting what was dropped and why
pub fn group_with_report(
    vehicles: &[VehicleIdentity],
    fixes: &[RawFix],
) -> (GroupedFixes, GroupingReport) {
    let known: HashSet<&VehicleId> = vehicles.iter().map(|v| &v.id).collect();
    let mut grouped: GroupedFixes = vehicles
        .iter()
        .map(|v| (v.id.clone(), Vec::new()))
        .collect();
    let mut report = GroupingReport {
        received: fixes.len(),
        ..GroupingReport::default()
    };

    for fix in fixes {
        if !known.contains(&fix.vehicle_id) {
            report.orphaned += 1;
            continue;
        }
        match validate::accept(fix) {
            Some(valid) => {
                if let Some(bucket) = grouped.get_mut(&fix.vehicle_id) {
                    bucket.push(valid);
                    report.accepted += 1;
                }
            }
            None => {
                log::trace!("dropping invalid fix for vehicle {}", fix.vehicle_id);
                report.invalid += 1;
            }
        }
    }

    // Stable: equal timestamps keep feed order
    for (id, bucket) in grouped.iter_mut() {
        bucket.sort_by_key(|f| f.timestamp);
        log::debug!("vehicle {id}: {} valid fixes", bucket.len());
    }

    if report.orphaned > 0 {
        log::debug!("{} fixes reference unknown vehicles", report.orphaned);
    }

    (grouped, report)
}
