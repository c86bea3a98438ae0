//! Vehicle location fusion: joins a vehicle feed with raw GPS fixes and
//! smooths each vehicle's path with a per-axis Kalman filter.
//!
//! The core (`validate`, `grouping`, `filters`, `trajectory`, `pipeline`)
//! performs no I/O and never fails; malformed fixes and empty feeds turn into
//! empty or shorter trajectories. `feeds` and `status` serve the CLI.

pub mod error;
pub mod feeds;
pub mod filters;
pub mod grouping;
pub mod pipeline;
pub mod status;
pub mod trajectory;
pub mod types;
pub mod validate;

pub use error::{ConfigError, FeedError};
pub use filters::{FilterState, KalmanConfig, PositionFilter};
pub use grouping::{group, GroupingReport};
pub use pipeline::{process, process_parallel, process_with_report, FleetTracker, ProcessOutput};
pub use trajectory::{assemble, Trajectory, TrajectoryAssembler, TrajectoryPoint};
pub use types::{RawFix, ValidatedFix, VehicleId, VehicleIdentity};
pub use validate::validate;
