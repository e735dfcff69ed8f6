//! One bounded polling run against a single feed endpoint.
//!
//! The loop fetches, decodes and accumulates on a fixed cadence until the
//! wall-clock deadline passes. Fetch and decode failures never end the run
//! early: they trigger a fixed backoff and the loop carries on. The deadline is
//! the only bound on retries.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::fetch::FeedSource;
use crate::parser::decode_records;
use crate::records::FeedRecord;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Total length of the run, measured from its start.
    pub duration: Duration,
    /// Cadence that fetches are phase-aligned to. Must be non-zero.
    pub interval: Duration,
    /// Pause after a failed fetch or decode.
    pub backoff: Duration,
}

impl PollSettings {
    pub fn new(duration: Duration, interval: Duration) -> Self {
        Self {
            duration,
            interval,
            backoff: DEFAULT_BACKOFF.max(interval.saturating_mul(2)),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Everything one poll cycle produced. Records keep fetch order.
#[derive(Debug, Clone)]
pub struct PollCycleResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<FeedRecord>,
    pub attempts: u32,
    pub failures: u32,
    pub cancelled: bool,
}

impl PollCycleResult {
    pub fn successes(&self) -> u32 {
        self.attempts - self.failures
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.finished_at - self.started_at
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Time left until the next multiple of `interval` since the Unix epoch.
///
/// Sleeping this long instead of a flat `interval` keeps fetch/decode latency
/// from accumulating as drift.
pub fn phase_aligned_delay(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let into_period = now.timestamp_millis().rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - into_period) as u64)
}

enum Outcome {
    Appended(usize),
    Failed,
}

/// Runs one poll cycle until `settings.duration` has elapsed or `cancel` fires.
///
/// Always returns a result. An empty record set means the window produced no
/// trip updates; `failures` says how many attempts errored.
#[tracing::instrument(
    skip_all,
    fields(
        source = %source.describe(),
        duration_secs = settings.duration.as_secs(),
        interval_secs = settings.interval.as_secs(),
    )
)]
pub async fn run_poll_cycle(
    source: &dyn FeedSource,
    clock: &dyn Clock,
    settings: PollSettings,
    cancel: &CancellationToken,
) -> PollCycleResult {
    let started_at = clock.now();
    let deadline = started_at
        .checked_add_signed(TimeDelta::from_std(settings.duration).unwrap_or(TimeDelta::MAX))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let mut records = Vec::new();
    let mut attempts = 0u32;
    let mut failures = 0u32;
    let mut cancelled = false;

    info!(%deadline, "Starting poll cycle");

    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if clock.now() >= deadline {
            break;
        }

        attempts += 1;
        let outcome = fetch_once(source, clock, &mut records).await;

        let pause = match outcome {
            Outcome::Appended(count) => {
                let elapsed_min = (clock.now() - started_at).num_seconds() as f64 / 60.0;
                if count == 0 {
                    info!(attempt = attempts, total = records.len(), "No records in current batch");
                } else {
                    info!(
                        attempt = attempts,
                        fetched = count,
                        total = records.len(),
                        elapsed_min = %format!("{elapsed_min:.1}"),
                        "Fetched records"
                    );
                }
                phase_aligned_delay(clock.now(), settings.interval)
            }
            Outcome::Failed => {
                failures += 1;
                debug!(backoff_secs = settings.backoff.as_secs(), "Backing off");
                settings.backoff
            }
        };

        if !sleep_until_next(clock, pause, deadline, cancel).await {
            cancelled = true;
            break;
        }
    }

    let result = PollCycleResult {
        started_at,
        finished_at: clock.now(),
        records,
        attempts,
        failures,
        cancelled,
    };

    if result.is_empty() {
        warn!(attempts, failures, cancelled, "No data collected during the window");
    } else {
        info!(
            records = result.records.len(),
            attempts,
            failures,
            cancelled,
            "Poll cycle complete"
        );
    }

    result
}

async fn fetch_once(
    source: &dyn FeedSource,
    clock: &dyn Clock,
    records: &mut Vec<FeedRecord>,
) -> Outcome {
    let body = match source.fetch().await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Feed fetch failed");
            return Outcome::Failed;
        }
    };

    match decode_records(&body, clock.now()) {
        Ok(batch) => {
            let count = batch.len();
            records.extend(batch);
            Outcome::Appended(count)
        }
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Feed decode failed");
            Outcome::Failed
        }
    }
}

/// Sleeps for `pause`, cut short at `deadline`. Returns `false` if cancelled.
async fn sleep_until_next(
    clock: &dyn Clock,
    pause: Duration,
    deadline: DateTime<Utc>,
    cancel: &CancellationToken,
) -> bool {
    let remaining = (deadline - clock.now()).to_std().unwrap_or(Duration::ZERO);
    let pause = pause.min(remaining);
    if pause.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = clock.sleep(pause) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use crate::gtfs_rt::trip_update::StopTimeUpdate;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate};
    use async_trait::async_trait;
    use bytes::Bytes;
    use prost::Message;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    enum Reply {
        Feed(usize),
        Garbage,
        Down,
    }

    /// Plays back scripted replies, then keeps repeating `fallback`.
    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        fallback: fn() -> Reply,
        clock: Arc<ManualClock>,
        latency: Duration,
    }

    impl Scripted {
        fn new(clock: Arc<ManualClock>, replies: Vec<Reply>, fallback: fn() -> Reply) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                clock,
                latency: Duration::ZERO,
            }
        }
    }

    fn feed_bytes(stops: usize) -> Bytes {
        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: vec![FeedEntity {
                id: "e1".to_string(),
                trip_update: Some(TripUpdate {
                    trip: TripDescriptor {
                        trip_id: Some("t1".to_string()),
                        route_id: Some("M15".to_string()),
                        ..Default::default()
                    },
                    stop_time_update: (0..stops)
                        .map(|i| StopTimeUpdate {
                            stop_id: Some(format!("s{i}")),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        };
        Bytes::from(feed.encode_to_vec())
    }

    #[async_trait]
    impl FeedSource for Scripted {
        async fn fetch(&self) -> Result<Bytes, TransportError> {
            self.clock.advance(self.latency);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(self.fallback);
            match reply {
                Reply::Feed(n) => Ok(feed_bytes(n)),
                Reply::Garbage => Ok(Bytes::from_static(&[0xFF, 0xFE, 0x00, 0x01])),
                Reply::Down => Err(TransportError::Io(std::io::Error::other("connection refused"))),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn aligned_start() -> DateTime<Utc> {
        // divisible by 30 s
        DateTime::from_timestamp(1_704_067_200, 0).unwrap()
    }

    #[test]
    fn test_phase_aligned_delay() {
        let t = aligned_start();
        let interval = Duration::from_secs(30);
        assert_eq!(phase_aligned_delay(t, interval), interval);
        assert_eq!(
            phase_aligned_delay(t + TimeDelta::seconds(7), interval),
            Duration::from_secs(23)
        );
        assert_eq!(
            phase_aligned_delay(t + TimeDelta::milliseconds(29_500), interval),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_default_backoff_is_longer_than_interval() {
        let s = PollSettings::new(Duration::from_secs(600), Duration::from_secs(30));
        assert_eq!(s.backoff, Duration::from_secs(60));
        let s = PollSettings::new(Duration::from_secs(600), Duration::from_secs(45));
        assert_eq!(s.backoff, Duration::from_secs(90));
        let s = PollSettings::new(Duration::from_secs(600), Duration::MAX);
        assert_eq!(s.backoff, Duration::MAX);
    }

    #[tokio::test]
    async fn test_zero_duration_makes_no_attempts() {
        let clock = Arc::new(ManualClock::new(aligned_start()));
        let source = Scripted::new(clock.clone(), vec![], || Reply::Feed(3));
        let settings = PollSettings::new(Duration::ZERO, Duration::from_secs(30));

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &CancellationToken::new()).await;

        assert_eq!(result.attempts, 0);
        assert!(result.records.is_empty());
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_fetches_on_interval_boundaries() {
        let clock = Arc::new(ManualClock::new(aligned_start()));
        let mut source = Scripted::new(clock.clone(), vec![], || Reply::Feed(2));
        source.latency = Duration::from_secs(4);
        let settings = PollSettings::new(Duration::from_secs(120), Duration::from_secs(30));

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &CancellationToken::new()).await;

        // fetches start at 0, 30, 60, 90; latency does not push them later
        assert_eq!(result.attempts, 4);
        assert_eq!(result.failures, 0);
        assert_eq!(result.records.len(), 8);
        let offsets: Vec<i64> = result
            .records
            .iter()
            .step_by(2)
            .map(|r| (r.timestamp - aligned_start()).num_seconds())
            .collect();
        assert_eq!(offsets, vec![4, 34, 64, 94]);
        assert_eq!(result.finished_at, aligned_start() + TimeDelta::seconds(120));
    }

    #[tokio::test]
    async fn test_all_failures_still_terminates_with_result() {
        let clock = Arc::new(ManualClock::new(aligned_start()));
        let source = Scripted::new(clock.clone(), vec![], || Reply::Down);
        let settings = PollSettings::new(Duration::from_secs(600), Duration::from_secs(30));

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &CancellationToken::new()).await;

        assert!(result.records.is_empty());
        assert!(result.failures > 0);
        assert_eq!(result.attempts, result.failures);
        // 60 s backoff over a 600 s window
        assert_eq!(result.attempts, 10);
        assert!(result.finished_at >= aligned_start() + TimeDelta::seconds(600));
    }

    #[tokio::test]
    async fn test_decode_failure_backs_off_and_recovers() {
        let clock = Arc::new(ManualClock::new(aligned_start()));
        let source = Scripted::new(
            clock.clone(),
            vec![Reply::Feed(1), Reply::Garbage, Reply::Down],
            || Reply::Feed(1),
        );
        let settings = PollSettings::new(Duration::from_secs(180), Duration::from_secs(30));

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &CancellationToken::new()).await;

        // t=0 ok, t=30 garbage, t=90 down, t=150 ok
        assert_eq!(result.attempts, 4);
        assert_eq!(result.failures, 2);
        assert_eq!(result.successes(), 2);
        assert_eq!(result.records.len(), 2);
        assert_eq!(
            (result.records[1].timestamp - aligned_start()).num_seconds(),
            150
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_empty() {
        let clock = Arc::new(ManualClock::new(aligned_start()));
        let source = Scripted::new(clock.clone(), vec![], || Reply::Feed(1));
        let settings = PollSettings::new(Duration::from_secs(600), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &cancel).await;

        assert!(result.cancelled);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_accumulated_records() {
        struct CancelAfterFirst {
            inner: Scripted,
            cancel: CancellationToken,
        }

        #[async_trait]
        impl FeedSource for CancelAfterFirst {
            async fn fetch(&self) -> Result<Bytes, TransportError> {
                let body = self.inner.fetch().await;
                self.cancel.cancel();
                body
            }

            fn describe(&self) -> String {
                "cancel-after-first".to_string()
            }
        }

        let clock = Arc::new(ManualClock::new(aligned_start()));
        let cancel = CancellationToken::new();
        let source = CancelAfterFirst {
            inner: Scripted::new(clock.clone(), vec![], || Reply::Feed(3)),
            cancel: cancel.clone(),
        };
        let settings = PollSettings::new(Duration::from_secs(600), Duration::from_secs(30));

        let result = run_poll_cycle(&source, clock.as_ref(), settings, &cancel).await;

        assert!(result.cancelled);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.records.len(), 3);
    }
}
