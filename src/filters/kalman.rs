//! Decoupled position/velocity Kalman filter for latitude and longitude
//!
//! Each axis runs the same scalar filter with a constant-velocity prediction.
//! Both axes live in one [`AxisVec`] so they always consume the same `dt`;
//! no cross-axis covariance is modelled.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{axis_vec, AxisVec, AXIS_LAT, AXIS_LNG};

/// Floor used when `KalmanConfig::min_dt` is not a positive number
pub const DEFAULT_MIN_DT: f64 = 0.1;

/// Filter tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Q: variance growth per unit time between fixes
    pub process_noise: f64,
    /// R: variance of a single raw fix
    pub measurement_noise: f64,
    /// Bound on each velocity component, in degrees per second
    pub velocity_limit: f64,
    /// Floor applied to every time step, in seconds
    pub min_dt: f64,
    /// Variance assigned on the first fix
    pub initial_variance: f64,
    /// Time step assumed when there is no previous fix
    pub default_dt: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 4.0,
            velocity_limit: 1.0,
            min_dt: DEFAULT_MIN_DT,
            initial_variance: 1.0,
            default_dt: 1.0,
        }
    }
}

impl KalmanConfig {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            process_noise,
            measurement_noise,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.process_noise) {
            return Err(ConfigError::ProcessNoise(self.process_noise));
        }
        if !positive(self.measurement_noise) {
            return Err(ConfigError::MeasurementNoise(self.measurement_noise));
        }
        if !positive(self.velocity_limit) {
            return Err(ConfigError::VelocityLimit(self.velocity_limit));
        }
        if !positive(self.min_dt) {
            return Err(ConfigError::MinDt(self.min_dt));
        }
        if !positive(self.initial_variance) {
            return Err(ConfigError::InitialVariance(self.initial_variance));
        }
        Ok(())
    }

    /// Time step actually used for propagation.
    ///
    /// Zero, negative and NaN steps all collapse to `min_dt`. The floor itself
    /// is always strictly positive, even for a config `validate` would reject.
    pub fn effective_dt(&self, dt: f64) -> f64 {
        let floor = if self.min_dt.is_finite() && self.min_dt > 0.0 {
            self.min_dt
        } else {
            DEFAULT_MIN_DT
        };
        dt.max(floor)
    }
}

/// Estimator state for one vehicle
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub position: AxisVec,
    pub velocity: AxisVec,
    pub variance: AxisVec,
    pub initialized: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            position: AxisVec::zeros(),
            velocity: AxisVec::zeros(),
            variance: AxisVec::zeros(),
            initialized: false,
        }
    }
}

impl FilterState {
    pub fn position_lat(&self) -> f64 {
        self.position[AXIS_LAT]
    }

    pub fn position_lng(&self) -> f64 {
        self.position[AXIS_LNG]
    }

    pub fn velocity_lat(&self) -> f64 {
        self.velocity[AXIS_LAT]
    }

    pub fn velocity_lng(&self) -> f64 {
        self.velocity[AXIS_LNG]
    }

    pub fn variance_lat(&self) -> f64 {
        self.variance[AXIS_LAT]
    }

    pub fn variance_lng(&self) -> f64 {
        self.variance[AXIS_LNG]
    }
}

/// Result of feeding one measurement
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    pub state: FilterState,
    /// Smoothed position emitted for this fix
    pub estimate: AxisVec,
    /// Constant-velocity prediction the measurement was blended against
    pub prediction: AxisVec,
    pub gain: AxisVec,
    /// Clamped time step that was used
    pub dt: f64,
}

/// Advance the filter by one measurement.
///
/// Pure: the caller owns `state` and decides whether to keep the returned one.
pub fn step(
    config: &KalmanConfig,
    state: &FilterState,
    measurement: AxisVec,
    dt: f64,
) -> StepOutcome {
    if !state.initialized {
        // Pass-through; nothing to blend against yet
        let state = FilterState {
            position: measurement,
            velocity: AxisVec::zeros(),
            variance: AxisVec::repeat(config.initial_variance),
            initialized: true,
        };
        return StepOutcome {
            state,
            estimate: measurement,
            prediction: measurement,
            gain: AxisVec::repeat(1.0),
            dt: config.effective_dt(dt),
        };
    }

    let dt = config.effective_dt(dt);

    let prediction = state.position + state.velocity * dt;
    let pred_variance = state.variance.add_scalar(dt * config.process_noise);
    let gain = pred_variance.map(|p| p / (p + config.measurement_noise));

    let position = prediction + gain.component_mul(&(measurement - prediction));
    let limit = config.velocity_limit.abs();
    let velocity = ((position - prediction) / dt).map(|v| {
        if v.is_finite() {
            v.max(-limit).min(limit)
        } else {
            0.0
        }
    });
    let variance = gain.map(|k| 1.0 - k).component_mul(&pred_variance);

    log::trace!(
        "kf step dt={dt:.3} gain=({:.4}, {:.4}) est=({:.7}, {:.7})",
        gain[AXIS_LAT],
        gain[AXIS_LNG],
        position[AXIS_LAT],
        position[AXIS_LNG]
    );

    StepOutcome {
        state: FilterState {
            position,
            velocity,
            variance,
            initialized: true,
        },
        estimate: position,
        prediction,
        gain,
        dt,
    }
}

/// Stateful wrapper around [`step`] for one smoothing run
#[derive(Clone, Debug)]
pub struct PositionFilter {
    config: KalmanConfig,
    state: FilterState,
}

impl PositionFilter {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            state: FilterState::default(),
        }
    }

    /// Continue from a previously saved state
    pub fn resume(config: KalmanConfig, state: FilterState) -> Self {
        Self { config, state }
    }

    /// Feed one measurement and keep the new state.
    ///
    /// A non-finite measurement leaves the state untouched and is echoed back.
    pub fn update(&mut self, measurement: AxisVec, dt: f64) -> StepOutcome {
        if measurement.iter().any(|v| !v.is_finite()) {
            log::warn!("ignoring non-finite measurement {:?}", measurement.as_slice());
            return StepOutcome {
                state: self.state,
                estimate: measurement,
                prediction: self.state.position,
                gain: AxisVec::zeros(),
                dt: self.config.effective_dt(dt),
            };
        }
        let outcome = step(&self.config, &self.state, measurement, dt);
        self.state = outcome.state;
        outcome
    }

    /// Filter a latitude/longitude pair, returning the smoothed pair
    pub fn filter(&mut self, latitude: f64, longitude: f64, dt: f64) -> (f64, f64) {
        let est = self.update(axis_vec(latitude, longitude), dt).estimate;
        (est[AXIS_LAT], est[AXIS_LNG])
    }

    /// Back to the uninitialized state with every field zeroed
    pub fn reset(&mut self) {
        self.state = FilterState::default();
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn config(&self) -> &KalmanConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = KalmanConfig::default();
        assert_eq!(config.process_noise, 0.01);
        assert_eq!(config.measurement_noise, 4.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_non_positive() {
        assert_eq!(
            KalmanConfig::new(0.0, 4.0).validate(),
            Err(ConfigError::ProcessNoise(0.0))
        );
        assert_eq!(
            KalmanConfig::new(0.01, -1.0).validate(),
            Err(ConfigError::MeasurementNoise(-1.0))
        );
        let config = KalmanConfig {
            velocity_limit: f64::NAN,
            ..KalmanConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::VelocityLimit(_))));
    }

    #[test]
    fn test_dt_floor() {
        let config = KalmanConfig::default();
        for dt in [0.0, -0.0, -1.0, -1e9, 0.05, f64::NAN, f64::NEG_INFINITY] {
            assert_eq!(config.effective_dt(dt), 0.1, "dt = {dt}");
        }
        assert_eq!(config.effective_dt(2.0), 2.0);
    }

    #[test]
    fn test_dt_floor_stays_positive_for_unvalidated_config() {
        for min_dt in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let config = KalmanConfig {
                min_dt,
                ..KalmanConfig::default()
            };
            assert!(config.validate().is_err());
            assert_eq!(config.effective_dt(0.0), DEFAULT_MIN_DT, "min_dt = {min_dt}");
        }
    }

    #[test]
    fn test_zero_min_dt_duplicate_fix_has_no_drift() {
        let config = KalmanConfig {
            min_dt: 0.0,
            ..KalmanConfig::default()
        };
        let mut filter = PositionFilter::new(config);
        filter.filter(5.0, 5.0, 1.0);
        let outcome = filter.update(axis_vec(5.0, 5.0), 0.0);
        assert_eq!(outcome.state.velocity, AxisVec::zeros());
        assert_eq!(filter.filter(5.0, 5.0, 10.0), (5.0, 5.0));
    }

    #[test]
    fn test_non_finite_velocity_is_zeroed() {
        // Zero variance and zero process noise make the gain 0/0
        let config = KalmanConfig {
            process_noise: 0.0,
            measurement_noise: 0.0,
            initial_variance: 0.0,
            ..KalmanConfig::default()
        };
        let first = step(&config, &FilterState::default(), axis_vec(1.0, 1.0), 1.0);
        let outcome = step(&config, &first.state, axis_vec(2.0, 2.0), 1.0);
        assert!(outcome.gain[AXIS_LAT].is_nan());
        assert_eq!(outcome.state.velocity, AxisVec::zeros());
    }

    #[test]
    fn test_first_fix_passes_through() {
        let mut filter = PositionFilter::new(KalmanConfig::default());
        let (lat, lng) = filter.filter(-6.9, 107.6, 1.0);
        assert_eq!(lat, -6.9);
        assert_eq!(lng, 107.6);

        let state = filter.state();
        assert!(state.initialized);
        assert_eq!(state.velocity, AxisVec::zeros());
        assert_eq!(state.variance, AxisVec::repeat(1.0));
    }

    #[test]
    fn test_tracking_step_matches_hand_computation() {
        let config = KalmanConfig::default();
        let mut filter = PositionFilter::new(config.clone());
        filter.filter(-6.9, 107.6, 1.0);
        let outcome = filter.update(axis_vec(-6.9001, 107.6001), 2.0);

        // predVariance = 1 + 2 * 0.01, gain = 1.02 / 5.02
        let gain = 1.02 / 5.02;
        assert_relative_eq!(outcome.gain[AXIS_LAT], gain, epsilon = 1e-15);
        assert_relative_eq!(
            outcome.estimate[AXIS_LAT],
            -6.9 + gain * (-6.9001 - -6.9),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            outcome.state.variance_lat(),
            (1.0 - gain) * 1.02,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            outcome.state.velocity_lng(),
            gain * 0.0001 / 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gain_stays_in_unit_interval() {
        let mut filter = PositionFilter::new(KalmanConfig::default());
        filter.filter(0.0, 0.0, 1.0);
        for i in 0..200 {
            let outcome = filter.update(axis_vec(i as f64 * 0.001, -(i as f64) * 0.001), 1.0);
            assert!(outcome.gain.iter().all(|k| *k > 0.0 && *k < 1.0));
        }
    }

    #[test]
    fn test_velocity_clamped() {
        let mut filter = PositionFilter::new(KalmanConfig::default());
        filter.filter(0.0, 0.0, 1.0);
        let jumps = [500.0, -800.0, 90.0, -90.0, 1e6, 0.0];
        for (i, jump) in jumps.iter().enumerate() {
            filter.update(axis_vec(*jump, -*jump), if i % 2 == 0 { 0.0 } else { 0.3 });
            let state = filter.state();
            assert!(state.velocity_lat().abs() <= 1.0);
            assert!(state.velocity_lng().abs() <= 1.0);
        }
    }

    #[test]
    fn test_velocity_limit_is_configurable() {
        let config = KalmanConfig {
            velocity_limit: 0.25,
            ..KalmanConfig::default()
        };
        let mut filter = PositionFilter::new(config);
        filter.filter(0.0, 0.0, 1.0);
        filter.filter(100.0, 100.0, 1.0);
        assert_eq!(filter.state().velocity_lat(), 0.25);
        assert_eq!(filter.state().velocity_lng(), 0.25);
    }

    #[test]
    fn test_duplicate_timestamp_uses_floor() {
        let config = KalmanConfig::default();
        let mut filter = PositionFilter::new(config);
        filter.filter(1.0, 1.0, 1.0);
        let outcome = filter.update(axis_vec(1.001, 1.001), 0.0);
        assert_eq!(outcome.dt, 0.1);
        assert!(outcome.estimate.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_non_finite_measurement_ignored() {
        let mut filter = PositionFilter::new(KalmanConfig::default());
        filter.filter(1.0, 2.0, 1.0);
        let before = *filter.state();
        let outcome = filter.update(axis_vec(f64::NAN, 2.0), 1.0);
        assert!(outcome.estimate[AXIS_LAT].is_nan());
        assert_eq!(*filter.state(), before);
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut filter = PositionFilter::new(KalmanConfig::default());
        filter.filter(1.0, 2.0, 1.0);
        filter.filter(1.1, 2.1, 1.0);
        filter.reset();
        assert!(!filter.is_initialized());
        assert_eq!(*filter.state(), FilterState::default());

        let (lat, lng) = filter.filter(5.0, 6.0, 3.0);
        assert_eq!((lat, lng), (5.0, 6.0));
    }

    #[test]
    fn test_step_is_pure() {
        let config = KalmanConfig::default();
        let first = step(&config, &FilterState::default(), axis_vec(3.0, 4.0), 1.0);
        let a = step(&config, &first.state, axis_vec(3.1, 4.1), 0.7);
        let b = step(&config, &first.state, axis_vec(3.1, 4.1), 0.7);
        assert_eq!(a, b);
        assert_eq!(first.state.position_lat(), 3.0);
    }

    #[test]
    fn test_axes_share_dt_but_not_state() {
        let config = KalmanConfig::default();
        let first = step(&config, &FilterState::default(), axis_vec(0.0, 0.0), 1.0);
        let outcome = step(&config, &first.state, axis_vec(0.5, 0.0), 1.0);
        assert!(outcome.estimate[AXIS_LAT] > 0.0);
        assert_eq!(outcome.estimate[AXIS_LNG], 0.0);
        assert_eq!(outcome.state.velocity_lng(), 0.0);
        assert_eq!(outcome.gain[AXIS_LAT], outcome.gain[AXIS_LNG]);
    }
}
