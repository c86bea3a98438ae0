//! Reading the two input feeds from JSON files
//!
//! Accepts a bare array or the upstream `{"data": [...]}` envelope, optionally
//! gzip-compressed. Individual records that do not deserialize are skipped
//! with a warning so one bad row cannot blank the whole feed.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FeedError, FeedResult};
use crate::types::{RawFix, VehicleIdentity, VehicleRecord};

/// Load the vehicle feed; an absent file is an empty feed
pub fn load_vehicles(path: &Path) -> FeedResult<Vec<VehicleIdentity>> {
    let doc = read_document(path)?;
    vehicles_from_value(&doc, path)
}

/// Load the coordinate feed; an absent file is an empty feed
pub fn load_fixes(path: &Path) -> FeedResult<Vec<RawFix>> {
    let doc = read_document(path)?;
    fixes_from_value(&doc, path)
}

pub fn vehicles_from_value(doc: &Value, source: &Path) -> FeedResult<Vec<VehicleIdentity>> {
    let records: Vec<VehicleRecord> = parse_records(doc, source, "vehicle")?;
    Ok(records.iter().map(VehicleIdentity::from).collect())
}

pub fn fixes_from_value(doc: &Value, source: &Path) -> FeedResult<Vec<RawFix>> {
    parse_records(doc, source, "coordinate")
}

fn read_document(path: &Path) -> FeedResult<Value> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("feed {} not found, treating as empty", path.display());
            return Ok(Value::Array(Vec::new()));
        }
        Err(source) => {
            return Err(FeedError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    serde_json::from_reader(reader).map_err(|source| {
        // gzip failures surface through serde_json as I/O errors
        if source.is_io() {
            FeedError::Io {
                path: path.to_path_buf(),
                source: source.into(),
            }
        } else {
            FeedError::Json {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn records<'a>(doc: &'a Value, source: &Path) -> FeedResult<&'a [Value]> {
    match doc {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => Ok(items.as_slice()),
            _ => {
                log::warn!("feed {} has no data array, treating as empty", source.display());
                Ok(&[][..])
            }
        },
        _ => Err(FeedError::Shape(source.to_path_buf())),
    }
}

fn parse_records<T: DeserializeOwned>(
    doc: &Value,
    source: &Path,
    kind: &str,
) -> FeedResult<Vec<T>> {
    let items = records(doc, source)?;
    let mut parsed = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match T::deserialize(item) {
            Ok(record) => parsed.push(record),
            Err(e) => log::warn!("skipping {kind} record {idx} in {}: {e}", source.display()),
        }
    }
    log::debug!(
        "loaded {}/{} {kind} records from {}",
        parsed.len(),
        items.len(),
        source.display()
    );
    Ok(parsed)
}
