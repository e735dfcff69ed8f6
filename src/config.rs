//! Collection campaign configuration.
//!
//! Stored as JSON; every field is optional and falls back to the defaults
//! below:
//! ```json
//! {
//!   "feed_url": "https://gtfsrt.prod.obanyc.com/tripUpdates",
//!   "key_placement": { "type": "query", "param": "key" },
//!   "years": [2024, 2025],
//!   "days_per_month": 3,
//!   "strategy": "distributed",
//!   "minutes_per_day": 60,
//!   "interval_secs": 30,
//!   "output_dir": "gtfs_data",
//!   "combine": true
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::output::OutputLayout;
use crate::poll::{DEFAULT_BACKOFF, DEFAULT_INTERVAL, PollSettings};
use crate::schedule::SchedulePolicy;

pub const DEFAULT_FEED_URL: &str = "https://gtfsrt.prod.obanyc.com/tripUpdates";

/// How the API key is attached to feed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyPlacement {
    /// `?<param>=<key>` on the feed URL.
    Query { param: String },
    /// `<name>: <key>` request header.
    Header { name: String },
}

impl Default for KeyPlacement {
    fn default() -> Self {
        KeyPlacement::Query {
            param: "key".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub feed_url: String,
    /// Usually supplied through `MTA_API_KEY` rather than the file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub key_placement: KeyPlacement,

    pub years: Vec<i32>,
    pub days_per_month: usize,
    pub strategy: String,
    pub seed: Option<u64>,

    pub minutes_per_day: u64,
    pub interval_secs: u64,
    pub backoff_secs: u64,

    pub output_dir: PathBuf,
    pub combine: bool,
    pub gzip: bool,
    /// Number of historical dates polled at once. 1 keeps days sequential.
    pub concurrency: usize,

    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            api_key: None,
            key_placement: KeyPlacement::default(),
            years: vec![2024, 2025],
            days_per_month: 3,
            strategy: "distributed".to_string(),
            seed: None,
            minutes_per_day: 60,
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            backoff_secs: DEFAULT_BACKOFF.as_secs(),
            output_dir: PathBuf::from("gtfs_data"),
            combine: true,
            gzip: false,
            concurrency: 1,
            s3_bucket: None,
            s3_prefix: None,
        }
    }
}

impl CampaignConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be greater than zero".into()));
        }
        if self.backoff_secs <= self.interval_secs {
            return Err(ConfigError::Invalid(
                "backoff_secs must be longer than interval_secs".into(),
            ));
        }
        if self.minutes_per_day.checked_mul(60).is_none() {
            return Err(ConfigError::Invalid(format!(
                "minutes_per_day {} is out of range",
                self.minutes_per_day
            )));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.years.is_empty() {
            return Err(ConfigError::Invalid("at least one year is required".into()));
        }
        if self.feed_url.trim().is_empty() {
            return Err(ConfigError::Invalid("feed_url is empty".into()));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.minutes_per_day.saturating_mul(60)),
            Duration::from_secs(self.interval_secs),
        )
        .with_backoff(Duration::from_secs(self.backoff_secs))
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        SchedulePolicy {
            years: self.years.clone(),
            days_per_month: self.days_per_month,
            strategy: self.strategy.clone(),
            seed: self.seed,
        }
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_dir, self.gzip)
    }
}
