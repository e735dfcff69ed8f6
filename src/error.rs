//! Error types shared across the collector.
//!
//! Per-fetch failures ([`TransportError`], [`DecodeError`]) are absorbed by
//! the poll cycle. [`ScheduleError`] and [`CampaignError`] abort the run they
//! occur in. [`PersistError`] is reported per day.

use std::path::PathBuf;

use thiserror::Error;

/// A fetch against the feed endpoint failed before a payload was obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid feed URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
}

/// The payload was not a structurally valid GTFS-Realtime `FeedMessage`.
#[derive(Debug, Error)]
#[error("malformed feed payload: {0}")]
pub struct DecodeError(#[from] pub prost::DecodeError);

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unknown day selection strategy '{0}' (expected distributed, random, weekdays or weekends)")]
    InvalidStrategy(String),

    #[error("invalid calendar date {year}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

/// Writing or reading a tabular output file failed.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures that abort a whole collection campaign.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
