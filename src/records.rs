//! Row types written to the per-day and combined CSV outputs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One stop-time update observed during a poll.
///
/// `timestamp` is the wall-clock time of the poll that produced the row, not
/// any timestamp carried inside the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub timestamp: DateTime<Utc>,
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub arrival_delay: Option<i32>,
    pub departure_delay: Option<i32>,
}

/// A [`FeedRecord`] tagged with the scheduled date it was collected for.
///
/// Spelled out field by field because the `csv` serializer does not support
/// `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRow {
    pub timestamp: DateTime<Utc>,
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub arrival_delay: Option<i32>,
    pub departure_delay: Option<i32>,
    pub collection_date: NaiveDate,
}

impl CombinedRow {
    pub fn tagged(record: FeedRecord, collection_date: NaiveDate) -> Self {
        Self {
            timestamp: record.timestamp,
            trip_id: record.trip_id,
            route_id: record.route_id,
            stop_id: record.stop_id,
            arrival_time: record.arrival_time,
            departure_time: record.departure_time,
            arrival_delay: record.arrival_delay,
            departure_delay: record.departure_delay,
            collection_date,
        }
    }
}
