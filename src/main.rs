//! CLI entry point for the GTFS-RT collector.
//!
//! Provides subcommands for decoding a single feed snapshot, running one
//! polling window, previewing a collection schedule, running a multi-day
//! collection campaign and rebuilding the combined output.

use std::ffi::OsStr;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use gtfs_rt_collector::campaign::{CombinedOutcome, Orchestrator, combine_existing};
use gtfs_rt_collector::clock::{Clock, SystemClock};
use gtfs_rt_collector::config::{CampaignConfig, KeyPlacement};
use gtfs_rt_collector::fetch::source_for;
use gtfs_rt_collector::output::{OutputLayout, write_rows};
use gtfs_rt_collector::parser::decode_records;
use gtfs_rt_collector::poll::run_poll_cycle;
use gtfs_rt_collector::schedule::DatePartition;
use gtfs_rt_collector::upload::upload_outputs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_collector")]
#[command(about = "Collect GTFS-RT trip updates on a schedule", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FeedArgs {
    /// Feed URL (or path to a local .pb snapshot)
    #[arg(long, env = "GTFS_RT_FEED_URL")]
    feed_url: Option<String>,

    /// API key attached to every request
    #[arg(long, env = "MTA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Send the key in this header instead of the `key` query parameter
    #[arg(long)]
    api_key_header: Option<String>,
}

#[derive(Args)]
struct PolicyArgs {
    /// Years to schedule, comma separated
    #[arg(long, value_delimiter = ',')]
    years: Option<Vec<i32>>,

    /// Days to collect per month
    #[arg(long)]
    days_per_month: Option<usize>,

    /// distributed, random, weekdays or weekends
    #[arg(long)]
    strategy: Option<String>,

    /// Seed for the sampled strategies
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one GTFS-RT payload from a file or URL into CSV rows
    Decode {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// CSV file to write the records to
        #[arg(short, long, default_value = "trip_updates.csv")]
        output: PathBuf,

        #[arg(long, env = "MTA_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Poll the feed for a fixed window and save everything collected
    Poll {
        #[command(flatten)]
        feed: FeedArgs,

        /// Collection window in minutes
        #[arg(short, long, default_value_t = 10)]
        minutes: u64,

        /// Seconds between fetches
        #[arg(short, long, default_value_t = 30)]
        interval: u64,

        /// Seconds to wait after a failed fetch [default: max(60, 2 x interval)]
        #[arg(long)]
        backoff: Option<u64>,

        /// CSV file to write the records to
        #[arg(short, long, default_value = "mta_realtime_data.csv")]
        output: PathBuf,
    },
    /// Print the collection schedule without collecting
    Schedule {
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Collect every scheduled date that is today or earlier
    Collect {
        /// JSON campaign config; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        feed: FeedArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Minutes to poll for each date
        #[arg(long)]
        minutes_per_day: Option<u64>,

        /// Seconds between fetches
        #[arg(long)]
        interval: Option<u64>,

        /// Directory for per-day and combined CSVs
        #[arg(short = 'd', long)]
        output_dir: Option<PathBuf>,

        /// Skip writing the combined file
        #[arg(long, default_value_t = false)]
        no_combine: bool,

        /// Gzip compress output files
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Number of dates polled at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Optional: S3 bucket to upload outputs to
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Start without asking for confirmation
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// Rebuild the combined CSV from the per-day files in a directory
    Combine {
        #[arg(short = 'd', long, default_value = "gtfs_data")]
        output_dir: PathBuf,

        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_collector.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_collector.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, stopping after the current fetch");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Decode {
            source,
            output,
            api_key,
        } => {
            let feed = source_for(&source, api_key.as_deref(), &KeyPlacement::default())?;
            let bytes = feed.fetch().await?;
            let records = decode_records(&bytes, Utc::now())?;
            write_rows(&output, &records)?;
            info!(records = records.len(), output = %output.display(), "Decoded feed");
        }
        Commands::Poll {
            feed,
            minutes,
            interval,
            backoff,
            output,
        } => {
            let cfg = CampaignConfig {
                minutes_per_day: minutes,
                interval_secs: interval,
                backoff_secs: backoff.unwrap_or(interval.saturating_mul(2).max(60)),
                ..apply_feed_args(CampaignConfig::default(), feed)
            };
            cfg.validate()?;

            let source = source_for(&cfg.feed_url, cfg.api_key.as_deref(), &cfg.key_placement)?;
            info!(
                minutes,
                interval,
                output = %output.display(),
                "Starting real-time data collection"
            );
            let result = run_poll_cycle(source.as_ref(), &SystemClock, cfg.poll_settings(), &cancel).await;

            if result.is_empty() {
                warn!("No data collected during the specified period");
            } else {
                write_rows(&output, &result.records)?;
                info!(
                    records = result.records.len(),
                    output = %output.display(),
                    "Collection complete"
                );
            }
        }
        Commands::Schedule { policy } => {
            let cfg = apply_policy_args(CampaignConfig::default(), policy);
            let schedule = cfg.schedule_policy().generate()?;

            info!(
                total = schedule.len(),
                years = ?cfg.years,
                strategy = %cfg.strategy,
                days_per_month = cfg.days_per_month,
                "Collection schedule generated"
            );
            for date in schedule.dates() {
                println!("{}", date.format("%Y-%m-%d (%A)"));
            }

            let split = schedule.partition(SystemClock.today());
            info!(
                eligible = split.eligible.len(),
                future = split.future.len(),
                "Date analysis"
            );
        }
        Commands::Collect {
            config,
            feed,
            policy,
            minutes_per_day,
            interval,
            output_dir,
            no_combine,
            gzip,
            concurrency,
            s3_bucket,
            yes,
        } => {
            let mut cfg = match config {
                Some(path) => CampaignConfig::load(&path)?,
                None => CampaignConfig::default(),
            };
            cfg = apply_policy_args(apply_feed_args(cfg, feed), policy);
            if let Some(m) = minutes_per_day {
                cfg.minutes_per_day = m;
            }
            if let Some(i) = interval {
                cfg.interval_secs = i;
                cfg.backoff_secs = cfg.backoff_secs.max(i.saturating_mul(2));
            }
            if let Some(d) = output_dir {
                cfg.output_dir = d;
            }
            if let Some(c) = concurrency {
                cfg.concurrency = c;
            }
            if s3_bucket.is_some() {
                cfg.s3_bucket = s3_bucket;
            }
            cfg.combine &= !no_combine;
            cfg.gzip |= gzip;

            collect(cfg, yes, &cancel).await?;
        }
        Commands::Combine { output_dir, gzip } => {
            let layout = OutputLayout::new(&output_dir, gzip);
            match combine_existing(&layout)? {
                CombinedOutcome::Written(dataset) => info!(
                    path = %dataset.path.display(),
                    records = dataset.rows.len(),
                    "Combined data saved"
                ),
                _ => warn!(dir = %output_dir.display(), "No per-day records to combine"),
            }
        }
    }

    Ok(())
}

/// Generates the schedule, confirms, runs the campaign and uploads outputs.
#[tracing::instrument(skip_all, fields(strategy = %cfg.strategy, years = ?cfg.years))]
async fn collect(cfg: CampaignConfig, assume_yes: bool, cancel: &CancellationToken) -> Result<()> {
    cfg.validate()?;
    let schedule = cfg.schedule_policy().generate()?;

    info!(
        total = schedule.len(),
        days_per_month = cfg.days_per_month,
        "Collection schedule generated"
    );
    for date in schedule.dates() {
        info!(date = %date.format("%Y-%m-%d (%A)"), "Scheduled");
    }

    let source = source_for(&cfg.feed_url, cfg.api_key.as_deref(), &cfg.key_placement)?;
    let orchestrator = Orchestrator::new(
        source,
        Arc::new(SystemClock),
        cfg.poll_settings(),
        cfg.layout(),
    )
    .with_combine(cfg.combine)
    .with_concurrency(cfg.concurrency);

    let confirm = |partition: &DatePartition| {
        if assume_yes {
            return true;
        }
        let stdin = std::io::stdin();
        answered_yes(prompt_yes(partition, &mut stdin.lock(), &mut std::io::stdout()))
    };

    let Some(report) = orchestrator.run(&schedule, confirm, cancel).await? else {
        return Ok(());
    };

    if let Some(bucket) = &cfg.s3_bucket {
        let files = report.written_files();
        if files.is_empty() {
            info!("Nothing to upload");
        } else {
            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            upload_outputs(&s3, bucket, cfg.s3_prefix.as_deref(), &files).await;
        }
    }

    Ok(())
}

/// Asks whether to collect the eligible dates now.
fn prompt_yes(
    partition: &DatePartition,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool> {
    writeln!(
        out,
        "{} date(s) can be collected now, {} are in the future and will be skipped.",
        partition.eligible.len(),
        partition.future.len()
    )?;
    write!(out, "Do you want to start collecting data now? (yes/no): ")?;
    out.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

/// An unreadable answer declines the campaign.
fn answered_yes(answer: Result<bool>) -> bool {
    answer.unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "Could not read confirmation, not collecting");
        false
    })
}

fn apply_feed_args(mut cfg: CampaignConfig, feed: FeedArgs) -> CampaignConfig {
    if let Some(url) = feed.feed_url {
        cfg.feed_url = url;
    }
    if feed.api_key.is_some() {
        cfg.api_key = feed.api_key;
    }
    if let Some(name) = feed.api_key_header {
        cfg.key_placement = KeyPlacement::Header { name };
    }
    cfg
}

fn apply_policy_args(mut cfg: CampaignConfig, policy: PolicyArgs) -> CampaignConfig {
    if let Some(years) = policy.years {
        cfg.years = years;
    }
    if let Some(k) = policy.days_per_month {
        cfg.days_per_month = k;
    }
    if let Some(s) = policy.strategy {
        cfg.strategy = s;
    }
    if policy.seed.is_some() {
        cfg.seed = policy.seed;
    }
    cfg
}
