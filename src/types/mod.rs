pub mod linalg;

pub use linalg::*;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;

/// Vehicle reference shared by both feeds.
///
/// The upstream service hands ids out as JSON numbers or strings depending on
/// the collection, so both are accepted and kept in their textual form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        VehicleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        VehicleId(id.to_string())
    }
}

impl From<u64> for VehicleId {
    fn from(id: u64) -> Self {
        VehicleId(id.to_string())
    }
}

impl Serialize for VehicleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VehicleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => Ok(VehicleId(number_id(&n))),
            Value::String(s) => Ok(VehicleId(s)),
            other => Err(D::Error::custom(format!("invalid vehicle id: {other}"))),
        }
    }
}

/// `1` and `1.0` name the same vehicle
fn number_id(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

/// Vehicle record as it arrives on the vehicle feed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub id: VehicleId,
    #[serde(default, alias = "merek")]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "nomor_kendaraan")]
    pub license_number: Option<String>,
    #[serde(default, alias = "jenis_kendaraan")]
    pub vehicle_type: Option<String>,
}

/// Read-only reference data for one vehicle
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleIdentity {
    pub id: VehicleId,
    pub display_name: String,
    pub number: String,
    pub category: String,
}

impl VehicleIdentity {
    pub fn new(id: impl Into<VehicleId>, display_name: &str, category: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.to_string(),
            number: String::new(),
            category: category.to_string(),
        }
    }
}

impl From<&VehicleRecord> for VehicleIdentity {
    fn from(record: &VehicleRecord) -> Self {
        let make = record.make.as_deref().unwrap_or("");
        let model = record.model.as_deref().unwrap_or("");
        let joined = format!("{make} {model}");
        let display_name = match joined.trim() {
            "" => format!("Vehicle {}", record.id),
            name => name.to_string(),
        };

        Self {
            id: record.id.clone(),
            display_name,
            number: record.license_number.clone().unwrap_or_default(),
            category: record.vehicle_type.clone().unwrap_or_default(),
        }
    }
}

/// One reported position sample, exactly as received.
///
/// Coordinates and timestamp stay optional here: a sample with a missing or
/// non-numeric field is still a sample, it just never passes validation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    #[serde(alias = "id")]
    pub vehicle_id: VehicleId,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub longitude: Option<f64>,
}

impl RawFix {
    pub fn new(
        vehicle_id: impl Into<VehicleId>,
        timestamp: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            timestamp: Some(timestamp),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }
}

/// A fix that passed validation; ordered by `timestamp`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedFix {
    pub vehicle_id: VehicleId,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl ValidatedFix {
    pub fn position(&self) -> AxisVec {
        axis_vec(self.latitude, self.longitude)
    }
}

/// Parse a feed timestamp: RFC 3339 / ISO-8601 text or epoch milliseconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch_millis),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Parse ISO-8601 text; strings without an offset are taken as UTC
pub fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_epoch_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    let secs = (ms / 1000.0).floor();
    let nanos = ((ms - secs * 1000.0) * 1_000_000.0).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp(&value))
}

fn lenient_coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}
