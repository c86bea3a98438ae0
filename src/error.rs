use std::path::PathBuf;

use thiserror::Error;

/// Rejected filter tuning
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("process noise must be positive and finite, got {0}")]
    ProcessNoise(f64),

    #[error("measurement noise must be positive and finite, got {0}")]
    MeasurementNoise(f64),

    #[error("velocity limit must be positive and finite, got {0}")]
    VelocityLimit(f64),

    #[error("minimum time step must be positive and finite, got {0}")]
    MinDt(f64),

    #[error("initial variance must be positive and finite, got {0}")]
    InitialVariance(f64),
}

/// Failure reading a feed file.
///
/// Only the CLI reads files; the fusion core itself never does I/O.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed feed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("feed {0} is neither an array nor a {{\"data\": [...]}} envelope")]
    Shape(PathBuf),
}

pub type FeedResult<T> = Result<T, FeedError>;
