use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use gtfs_rt_collector::campaign::{CombinedOutcome, Orchestrator};
use gtfs_rt_collector::clock::ManualClock;
use gtfs_rt_collector::error::TransportError;
use gtfs_rt_collector::fetch::{FeedSource, FileFeed};
use gtfs_rt_collector::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
use gtfs_rt_collector::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate};
use gtfs_rt_collector::output::{OutputLayout, read_rows};
use gtfs_rt_collector::poll::{PollSettings, run_poll_cycle};
use gtfs_rt_collector::records::{CombinedRow, FeedRecord};
use gtfs_rt_collector::schedule::SchedulePolicy;
use prost::Message;
use tokio_util::sync::CancellationToken;

fn sample_feed(stops: usize) -> FeedMessage {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_704_067_200),
            ..Default::default()
        },
        entity: vec![
            FeedEntity {
                id: "alert-ish".to_string(),
                ..Default::default()
            },
            FeedEntity {
                id: "trip".to_string(),
                trip_update: Some(TripUpdate {
                    trip: TripDescriptor {
                        trip_id: Some("MTA_NYCT_B46".to_string()),
                        route_id: Some("B46".to_string()),
                        ..Default::default()
                    },
                    stop_time_update: (0..stops)
                        .map(|i| StopTimeUpdate {
                            stop_id: Some(format!("30{i}")),
                            arrival: Some(StopTimeEvent {
                                time: Some(1_704_067_260 + i as i64 * 60),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ],
    }
}

/// Hands out one canned payload per fetch; empty feeds once exhausted.
struct Canned(Mutex<Vec<Bytes>>);

#[async_trait]
impl FeedSource for Canned {
    async fn fetch(&self) -> Result<Bytes, TransportError> {
        let mut queue = self.0.lock().unwrap();
        if queue.is_empty() {
            Ok(Bytes::from(sample_feed(0).encode_to_vec()))
        } else {
            Ok(queue.remove(0))
        }
    }

    fn describe(&self) -> String {
        "canned".to_string()
    }
}

#[tokio::test]
async fn test_poll_cycle_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tripUpdates.pb");
    std::fs::write(&path, sample_feed(3).encode_to_vec()).unwrap();

    let start = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap();
    let clock = ManualClock::new(start);
    let settings = PollSettings::new(Duration::from_secs(90), Duration::from_secs(30));

    let result = run_poll_cycle(&FileFeed::new(&path), &clock, settings, &CancellationToken::new()).await;

    assert_eq!(result.attempts, 3);
    assert_eq!(result.failures, 0);
    assert_eq!(result.records.len(), 9);
    assert!(result.records.iter().all(|r| r.arrival_time.is_some()));
    assert!(result.records.iter().all(|r| r.arrival_delay.is_none()));
    assert_eq!(result.elapsed().num_seconds(), 90);
}

#[tokio::test]
async fn test_campaign_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let policy = SchedulePolicy {
        years: vec![2024],
        days_per_month: 1,
        strategy: "distributed".to_string(),
        seed: None,
    };
    let schedule = policy.generate().unwrap();
    assert_eq!(schedule.dates()[0], NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());

    // "today" is 2024-02-20, so January 16 and February 15 are eligible
    let start = NaiveDate::from_ymd_opt(2024, 2, 20)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
        .and_utc();
    let clock = Arc::new(ManualClock::new(start));
    let source = Arc::new(Canned(Mutex::new(vec![
        Bytes::from(sample_feed(5).encode_to_vec()),
        Bytes::from(sample_feed(0).encode_to_vec()),
    ])));

    let orchestrator = Orchestrator::new(
        source,
        clock,
        PollSettings::new(Duration::from_secs(30), Duration::from_secs(30)),
        OutputLayout::new(dir.path(), false),
    );

    let report = orchestrator
        .run(&schedule, |_| true, &CancellationToken::new())
        .await
        .unwrap()
        .expect("confirmed campaign returns a report");

    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.partition.future.len(), 10);

    let day_one: Vec<FeedRecord> =
        read_rows(&dir.path().join("date=2024-01-16.csv")).unwrap();
    assert_eq!(day_one.len(), 5);
    assert_eq!(day_one[0].route_id, "B46");

    let CombinedOutcome::Written(dataset) = &report.combined else {
        panic!("expected a combined dataset");
    };
    let combined: Vec<CombinedRow> = read_rows(&dataset.path).unwrap();
    assert_eq!(combined.len(), 5);
    assert!(combined
        .iter()
        .all(|r| r.collection_date == NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()));
}

#[test]
fn test_invalid_strategy_fails_before_scheduling() {
    let policy = SchedulePolicy {
        years: vec![2024],
        days_per_month: 2,
        strategy: "holidays".to_string(),
        seed: None,
    };
    let err = policy.generate().unwrap_err();
    assert!(err.to_string().contains("holidays"));
}
