//! Protobuf parser for GTFS Realtime feeds, plus normalization of trip
//! updates into flat [`FeedRecord`] rows.

use chrono::{DateTime, Utc};
use prost::Message;

use crate::error::DecodeError;
use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_update::StopTimeEvent;
use crate::records::FeedRecord;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Flattens every stop-time update of every trip-update entity into a
/// [`FeedRecord`] stamped with `captured_at`.
///
/// Entities without a trip update are skipped. Optional times and delays stay
/// `None` when the producer did not set them.
pub fn normalize(feed: &FeedMessage, captured_at: DateTime<Utc>) -> Vec<FeedRecord> {
    let mut records = Vec::new();

    for entity in &feed.entity {
        let Some(update) = &entity.trip_update else {
            continue;
        };

        let trip_id = update.trip.trip_id.clone().unwrap_or_default();
        let route_id = update.trip.route_id.clone().unwrap_or_default();

        for stu in &update.stop_time_update {
            records.push(FeedRecord {
                timestamp: captured_at,
                trip_id: trip_id.clone(),
                route_id: route_id.clone(),
                stop_id: stu.stop_id.clone().unwrap_or_default(),
                arrival_time: event_time(stu.arrival.as_ref()),
                departure_time: event_time(stu.departure.as_ref()),
                arrival_delay: stu.arrival.as_ref().and_then(|e| e.delay),
                departure_delay: stu.departure.as_ref().and_then(|e| e.delay),
            });
        }
    }

    records
}

/// Decodes `bytes` and normalizes the result in one step.
pub fn decode_records(
    bytes: &[u8],
    captured_at: DateTime<Utc>,
) -> Result<Vec<FeedRecord>, DecodeError> {
    let feed = parse_feed(bytes)?;
    Ok(normalize(&feed, captured_at))
}

fn event_time(event: Option<&StopTimeEvent>) -> Option<DateTime<Utc>> {
    event
        .and_then(|e| e.time)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::StopTimeUpdate;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, TripDescriptor, TripUpdate};

    fn header() -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_700_000_000),
            incrementality: None,
            feed_version: None,
        }
    }

    fn stop_event(delay: Option<i32>, time: Option<i64>) -> StopTimeEvent {
        StopTimeEvent {
            delay,
            time,
            ..Default::default()
        }
    }

    fn trip_entity(id: &str, updates: Vec<StopTimeUpdate>) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some(format!("trip-{id}")),
                    route_id: Some("A".to_string()),
                    ..Default::default()
                },
                stop_time_update: updates,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn captured() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_030, 0).unwrap()
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty byte array decodes to a FeedMessage with default values
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(parse_feed(&invalid_bytes).is_err());
        assert!(decode_records(&invalid_bytes, captured()).is_err());
    }

    #[test]
    fn test_parse_valid_minimal_feed() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![],
        };
        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();

        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
        assert_eq!(parsed.header.timestamp, Some(1_700_000_000));
    }

    #[test]
    fn test_arrival_without_delay_stays_absent() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![trip_entity(
                "1",
                vec![StopTimeUpdate {
                    stop_id: Some("101N".to_string()),
                    arrival: Some(stop_event(None, Some(1_700_000_100))),
                    ..Default::default()
                }],
            )],
        };

        let records = decode_records(&feed.encode_to_vec(), captured()).unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.arrival_time.unwrap().timestamp(), 1_700_000_100);
        assert_eq!(r.arrival_delay, None);
        assert_eq!(r.departure_time, None);
        assert_eq!(r.departure_delay, None);
        assert_eq!(r.timestamp, captured());
    }

    #[test]
    fn test_zero_delay_is_kept_as_value() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![trip_entity(
                "1",
                vec![StopTimeUpdate {
                    stop_id: Some("101N".to_string()),
                    departure: Some(stop_event(Some(0), Some(1_700_000_200))),
                    ..Default::default()
                }],
            )],
        };

        let records = normalize(&feed, captured());
        assert_eq!(records[0].departure_delay, Some(0));
        assert_eq!(records[0].arrival_delay, None);
    }

    #[test]
    fn test_entities_without_trip_update_are_skipped() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![
                FeedEntity {
                    id: "vehicle-only".to_string(),
                    ..Default::default()
                },
                trip_entity(
                    "2",
                    vec![
                        StopTimeUpdate {
                            stop_id: Some("201S".to_string()),
                            ..Default::default()
                        },
                        StopTimeUpdate {
                            stop_id: Some("202S".to_string()),
                            ..Default::default()
                        },
                    ],
                ),
            ],
        };

        let records = normalize(&feed, captured());

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.trip_id == "trip-2"));
        assert!(records.iter().all(|r| r.route_id == "A"));
        assert_eq!(records[0].stop_id, "201S");
        assert_eq!(records[1].stop_id, "202S");
    }
}
