//! Linear algebra types for the position filter
//!
//! Latitude and longitude are tracked as the two components of one fixed-size
//! vector so both axes always step together with the same time delta.

use nalgebra::SVector;

// ===== Axis Dimensions =====
pub const AXIS_COUNT: usize = 2; // (latitude, longitude)
pub const AXIS_LAT: usize = 0;
pub const AXIS_LNG: usize = 1;

/// One value per axis: `[latitude, longitude]`
pub type AxisVec = SVector<f64, AXIS_COUNT>;

/// Build an axis vector from a latitude/longitude pair
pub fn axis_vec(latitude: f64, longitude: f64) -> AxisVec {
    AxisVec::new(latitude, longitude)
}
