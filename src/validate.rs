use crate::types::{RawFix, ValidatedFix};

/// True when a fix carries finite latitude/longitude and a usable timestamp.
///
/// Rejection is not an error: noisy or half-filled samples are expected
/// traffic and are simply left out of every downstream array.
pub fn validate(fix: &RawFix) -> bool {
    accept(fix).is_some()
}

/// Validate and narrow a raw fix in one pass
pub fn accept(fix: &RawFix) -> Option<ValidatedFix> {
    let latitude = fix.latitude.filter(|v| v.is_finite())?;
    let longitude = fix.longitude.filter(|v| v.is_finite())?;
    let timestamp = fix.timestamp?;

    Some(ValidatedFix {
        vehicle_id: fix.vehicle_id.clone(),
        timestamp,
        latitude,
        longitude,
    })
}
