//! Multi-day collection campaigns.
//!
//! A campaign splits a [`CollectionSchedule`] around today, asks for
//! confirmation, runs one poll cycle per eligible date, writes each day's
//! records to its own file and optionally merges everything into one
//! combined file. Dates after today are only reported.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::clock::Clock;
use crate::error::{CampaignError, PersistError};
use crate::fetch::FeedSource;
use crate::output::{OutputLayout, read_rows, write_rows};
use crate::poll::{PollSettings, run_poll_cycle};
use crate::records::{CombinedRow, FeedRecord};
use crate::schedule::{CollectionSchedule, DatePartition};

/// What was collected and written for one scheduled date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRun {
    pub date: NaiveDate,
    /// `None` when the day produced no records or the write failed.
    pub output: Option<PathBuf>,
    pub record_count: usize,
    pub attempts: u32,
    pub failures: u32,
    pub persist_error: Option<String>,
}

/// Every collected row tagged with its collection date, in date order.
#[derive(Debug, Clone)]
pub struct CombinedDataset {
    pub path: PathBuf,
    pub rows: Vec<CombinedRow>,
}

impl CombinedDataset {
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.rows.first()?.collection_date;
        let last = self.rows.last()?.collection_date;
        Some((first, last))
    }
}

#[derive(Debug)]
pub enum CombinedOutcome {
    NotRequested,
    /// Requested, but no run produced any records.
    Empty,
    Written(CombinedDataset),
    Failed { path: PathBuf, error: String },
}

#[derive(Debug)]
pub struct CampaignReport {
    pub partition: DatePartition,
    pub runs: Vec<CollectionRun>,
    pub combined: CombinedOutcome,
    /// Set when cancellation stopped the campaign before every eligible date ran.
    pub cancelled: bool,
}

impl CampaignReport {
    pub fn total_records(&self) -> usize {
        self.runs.iter().map(|r| r.record_count).sum()
    }

    /// Files this campaign wrote, per-day outputs first.
    pub fn written_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.runs.iter().filter_map(|r| r.output.clone()).collect();
        if let CombinedOutcome::Written(dataset) = &self.combined {
            files.push(dataset.path.clone());
        }
        files
    }
}

struct DayOutcome {
    run: CollectionRun,
    records: Vec<FeedRecord>,
}

pub struct Orchestrator {
    source: Arc<dyn FeedSource>,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
    layout: OutputLayout,
    combine: bool,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn FeedSource>,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
        layout: OutputLayout,
    ) -> Self {
        Self {
            source,
            clock,
            settings,
            layout,
            combine: true,
            concurrency: 1,
        }
    }

    pub fn with_combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs the campaign for every eligible date of `schedule`.
    ///
    /// `confirm` sees the eligible/future split before anything is fetched;
    /// returning `false` yields `Ok(None)` with nothing collected.
    #[tracing::instrument(
        skip_all,
        fields(scheduled = schedule.len(), output_dir = %self.layout.dir.display())
    )]
    pub async fn run<F>(
        &self,
        schedule: &CollectionSchedule,
        confirm: F,
        cancel: &CancellationToken,
    ) -> Result<Option<CampaignReport>, CampaignError>
    where
        F: FnOnce(&DatePartition) -> bool,
    {
        let today = self.clock.today();
        let partition = schedule.partition(today);

        info!(
            %today,
            eligible = partition.eligible.len(),
            future = partition.future.len(),
            "Date analysis"
        );
        for date in partition.future.iter().take(5) {
            info!(date = %date.format("%Y-%m-%d (%A)"), "Future date, not collected");
        }
        if partition.future.len() > 5 {
            info!(more = partition.future.len() - 5, "Further future dates omitted");
        }

        if !confirm(&partition) {
            info!("Collection cancelled");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.layout.dir).map_err(|source| CampaignError::OutputDir {
            path: self.layout.dir.clone(),
            source,
        })?;

        let mut outcomes = if self.concurrency > 1 {
            self.collect_concurrent(&partition.eligible, cancel).await
        } else {
            self.collect_sequential(&partition.eligible, cancel).await
        };
        outcomes.sort_by_key(|o| o.run.date);

        let cancelled = cancel.is_cancelled();
        let combined = if self.combine {
            write_combined(&self.layout, &outcomes)
        } else {
            CombinedOutcome::NotRequested
        };

        let report = CampaignReport {
            partition,
            runs: outcomes.into_iter().map(|o| o.run).collect(),
            combined,
            cancelled,
        };
        log_summary(&report);

        Ok(Some(report))
    }

    async fn collect_sequential(
        &self,
        dates: &[NaiveDate],
        cancel: &CancellationToken,
    ) -> Vec<DayOutcome> {
        let mut outcomes = Vec::with_capacity(dates.len());

        for (i, &date) in dates.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = dates.len() - i, "Cancelled, skipping remaining dates");
                break;
            }

            let span = tracing::info_span!("collect_day", %date, n = i + 1, of = dates.len());
            let outcome = collect_day(
                self.source.as_ref(),
                self.clock.as_ref(),
                self.settings,
                &self.layout,
                date,
                cancel,
            )
            .instrument(span)
            .await;
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn collect_concurrent(
        &self,
        dates: &[NaiveDate],
        cancel: &CancellationToken,
    ) -> Vec<DayOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(dates.len());

        for (i, &date) in dates.iter().enumerate() {
            let sem = semaphore.clone();
            let source = self.source.clone();
            let clock = self.clock.clone();
            let layout = self.layout.clone();
            let settings = self.settings;
            let cancel = cancel.clone();

            let span = tracing::info_span!("collect_day", %date, n = i + 1, of = dates.len());

            let task = tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(
                        collect_day(
                            source.as_ref(),
                            clock.as_ref(),
                            settings,
                            &layout,
                            date,
                            &cancel,
                        )
                        .await,
                    )
                }
                .instrument(span),
            );
            tasks.push(task);
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Collection task failed"),
            }
        }
        outcomes
    }
}

async fn collect_day(
    source: &dyn FeedSource,
    clock: &dyn Clock,
    settings: PollSettings,
    layout: &OutputLayout,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> DayOutcome {
    info!(date = %date.format("%Y-%m-%d (%A)"), "Starting collection");

    let result = run_poll_cycle(source, clock, settings, cancel).await;

    let mut run = CollectionRun {
        date,
        output: None,
        record_count: result.records.len(),
        attempts: result.attempts,
        failures: result.failures,
        persist_error: None,
    };

    if !result.records.is_empty() {
        let path = layout.day_path(date);
        match write_rows(&path, &result.records) {
            Ok(()) => {
                info!(path = %path.display(), records = run.record_count, "Saved day");
                run.output = Some(path);
            }
            Err(e) => {
                error!(error = %e, "Failed to save day");
                run.persist_error = Some(e.to_string());
            }
        }
    } else {
        warn!("No records collected for this date");
    }

    DayOutcome {
        run,
        records: result.records,
    }
}

fn write_combined(layout: &OutputLayout, outcomes: &[DayOutcome]) -> CombinedOutcome {
    let rows: Vec<CombinedRow> = outcomes
        .iter()
        .flat_map(|o| {
            o.records
                .iter()
                .cloned()
                .map(move |r| CombinedRow::tagged(r, o.run.date))
        })
        .collect();

    persist_combined(layout, rows)
}

fn persist_combined(layout: &OutputLayout, rows: Vec<CombinedRow>) -> CombinedOutcome {
    if rows.is_empty() {
        warn!("No records to combine");
        return CombinedOutcome::Empty;
    }

    let path = layout.combined_path();
    match write_rows(&path, &rows) {
        Ok(()) => {
            let dataset = CombinedDataset { path, rows };
            if let Some((first, last)) = dataset.date_range() {
                info!(
                    path = %dataset.path.display(),
                    records = dataset.rows.len(),
                    %first,
                    %last,
                    "Combined data saved"
                );
            }
            CombinedOutcome::Written(dataset)
        }
        Err(e) => {
            error!(error = %e, "Failed to write combined dataset");
            CombinedOutcome::Failed {
                path,
                error: e.to_string(),
            }
        }
    }
}

/// Rebuilds the combined file from the per-day files already in
/// `layout.dir`, e.g. after later invocations filled in more dates.
pub fn combine_existing(layout: &OutputLayout) -> Result<CombinedOutcome, PersistError> {
    let mut rows = Vec::new();
    for (date, path) in layout.existing_days()? {
        let records: Vec<FeedRecord> = read_rows(&path)?;
        rows.extend(records.into_iter().map(|r| CombinedRow::tagged(r, date)));
    }
    Ok(persist_combined(layout, rows))
}

fn log_summary(report: &CampaignReport) {
    let failed_days = report.runs.iter().filter(|r| r.persist_error.is_some()).count();
    let empty_days = report.runs.iter().filter(|r| r.record_count == 0).count();

    if report.total_records() == 0 {
        warn!(
            days = report.runs.len(),
            cancelled = report.cancelled,
            "Campaign finished without collecting any records"
        );
    } else {
        info!(
            days = report.runs.len(),
            empty_days,
            failed_days,
            total_records = report.total_records(),
            cancelled = report.cancelled,
            "Campaign complete"
        );
    }
}
