pub mod kalman;

pub use kalman::{step, FilterState, KalmanConfig, PositionFilter, StepOutcome};
