use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Duplicate timestamp {timestamp} for station {station_id}")]
    DuplicateTimestamp {
        station_id: u32,
        timestamp: NaiveDateTime,
    },

    #[error("Atomic write of {path} failed: {reason}")]
    AtomicWrite { path: PathBuf, reason: String },

    #[error("Data merge error: {0}")]
    Merge(String),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Policy configuration error: {0}")]
    Policy(#[from] config::ConfigError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid provenance flag: {0}")]
    InvalidProvenanceFlag(char),

    #[error("Summary serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
