use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::pipeline::{ProcessOutput, RefreshStats};

/// Snapshot written after every refresh
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefreshStatus {
    pub generated_at: DateTime<Utc>,
    pub refresh_count: u64,
    pub vehicles: usize,
    pub vehicles_with_fixes: usize,
    // Coordinate feed accounting
    pub fixes_received: usize,
    pub fixes_accepted: usize,
    pub fixes_invalid: usize,
    pub fixes_orphaned: usize,
    // Incremental refresh
    pub vehicles_resumed: usize,
    pub vehicles_rebuilt: usize,
    pub fixes_filtered: usize,
    pub elapsed_ms: f64,
}

impl RefreshStatus {
    pub fn new(refresh_count: u64, output: &ProcessOutput) -> Self {
        let vehicles = output.trajectories.len();
        Self {
            generated_at: Utc::now(),
            refresh_count,
            vehicles,
            vehicles_with_fixes: output.trajectories.iter().filter(|t| !t.is_empty()).count(),
            fixes_received: output.report.received,
            fixes_accepted: output.report.accepted,
            fixes_invalid: output.report.invalid,
            fixes_orphaned: output.report.orphaned,
            vehicles_resumed: 0,
            vehicles_rebuilt: vehicles,
            fixes_filtered: output.report.accepted,
            elapsed_ms: 0.0,
        }
    }

    pub fn with_refresh_stats(mut self, stats: &RefreshStats) -> Self {
        self.vehicles_resumed = stats.resumed;
        self.vehicles_rebuilt = stats.rebuilt;
        self.fixes_filtered = stats.filtered_fixes;
        self
    }

    pub fn one_line(&self) -> String {
        format!(
            "refresh #{}: {} vehicles ({} with fixes), fixes {}/{} accepted, {} invalid, {} orphaned, {:.1} ms",
            self.refresh_count,
            self.vehicles,
            self.vehicles_with_fixes,
            self.fixes_accepted,
            self.fixes_received,
            self.fixes_invalid,
            self.fixes_orphaned,
            self.elapsed_ms
        )
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
