//! CLI entry point for transit_otp.
//!
//! Provides subcommands for ingesting GTFS-RT trip updates, analyzing
//! on-time performance over a time window, publishing results to S3 and
//! printing the current results.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_otp::analyzers::diagnostics::{IngestDiagnostics, RunDiagnostics};
use transit_otp::analyzers::{Pipeline, publish::publish};
use transit_otp::config::{AgencyTable, Settings};
use transit_otp::feed::{extract_trip_updates, parse_feed};
use transit_otp::fetch::{client_for, fetch_bytes};
use transit_otp::output::{append_records, print_json};
use transit_otp::schedule::loader::load_snapshot;
use transit_otp::store::{ResultsStore, SqliteStore, TimeWindow};

#[derive(Parser)]
#[command(name = "transit_otp")]
#[command(about = "On-time performance of transit routes from GTFS-RT feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every configured feed and append its trip updates
    Ingest {
        /// Only ingest feeds of this agency label
        #[arg(short, long)]
        agency: Option<String>,

        /// Maximum number of concurrent feed downloads
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        /// Sample rate: query each feed every X seconds
        #[arg(short = 'r', long, default_value_t = 60)]
        sample_rate: u64,

        /// Number of samples to collect (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        num_samples: usize,
    },
    /// Compute on-time performance from updates ingested in a time window
    Analyze {
        /// Window length ending at --until (ignored when --from is given)
        #[arg(long, default_value_t = 24)]
        lookback_hours: i64,

        /// Window start, RFC 3339 (inclusive)
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,

        /// Window end, RFC 3339 (exclusive); defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        until: Option<DateTime<Utc>>,

        /// Only analyze this agency (label or static agency id)
        #[arg(short, long)]
        agency: Option<String>,

        /// CSV file to append run diagnostics to
        #[arg(short, long)]
        diagnostics: Option<String>,
    },
    /// Upload current on-time performance as JSON to S3
    Publish {
        /// S3 bucket name to upload JSON to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Gzip compress documents before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Print current on-time performance rows as JSON
    Show {
        /// Only show this static agency id
        #[arg(short, long)]
        agency: Option<String>,
    },
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{value}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_otp.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_otp.log"));

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

    let db_path = std::env::var("OTP_DB_PATH").unwrap_or_else(|_| "transit_otp.db".to_string());

    match cli.command {
        Commands::Ingest {
            agency,
            concurrency,
            sample_rate,
            num_samples,
        } => {
            let agencies = load_agencies()?;
            let mut store = open_store(&db_path)?;
            ingest(
                &agencies,
                &mut store,
                agency.as_deref(),
                concurrency,
                sample_rate,
                num_samples,
            )
            .await?;
        }
        Commands::Analyze {
            lookback_hours,
            from,
            until,
            agency,
            diagnostics,
        } => {
            let end = until.unwrap_or_else(Utc::now);
            let window = match from {
                Some(start) => TimeWindow::new(start, end),
                None => TimeWindow::ending_at(end, Duration::hours(lookback_hours)),
            };
            if window.start >= window.end {
                bail!("Empty analysis window [{}, {})", window.start, window.end);
            }

            let agencies = load_agencies()?;
            let schedule = Arc::new(load_snapshot(&agencies));
            // Reads and the per-agency replace transactions use separate connections.
            let source = open_store(&db_path)?;
            let mut store = open_store(&db_path)?;

            let pipeline = Pipeline::new(&agencies, schedule);
            let report = pipeline.analyze(&source, &mut store, &window, agency.as_deref());

            if let Some(path) = diagnostics {
                let rows: Vec<RunDiagnostics> = report.diagnostics().cloned().collect();
                append_records(&path, &rows)
                    .with_context(|| format!("Failed to append diagnostics to {path}"))?;
            }

            for run in &report.agencies {
                if let Some(e) = &run.error {
                    error!(agency = %run.diagnostics.agency, error = %e, "Agency analysis failed");
                }
            }
            if report.has_failures() {
                bail!("Analysis failed for at least one agency");
            }
        }
        Commands::Publish { s3_bucket, gzip } => {
            let store = open_store(&db_path)?;
            let rows = store.performance(None)?;

            let config = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&config);
            let agencies = publish(&s3, &s3_bucket, rows, gzip).await?;
            info!(bucket = %s3_bucket, agencies, gzip, "Publish complete");
        }
        Commands::Show { agency } => {
            let store = open_store(&db_path)?;
            let rows = store.performance(agency.as_deref())?;
            print_json(&rows)?;
        }
    }

    Ok(())
}

fn load_agencies() -> Result<AgencyTable> {
    let path =
        std::env::var("OTP_CONFIG_PATH").unwrap_or_else(|_| "config/agencies.json".to_string());
    let settings =
        Settings::load(&path).with_context(|| format!("Failed to load agency config {path}"))?;
    let table = AgencyTable::try_from(settings)?;
    info!(path = %path, agencies = table.len(), "Agency config loaded");
    Ok(table)
}

fn open_store(path: &str) -> Result<SqliteStore> {
    let store =
        SqliteStore::open(path).with_context(|| format!("Failed to open database {path}"))?;
    store.migrate()?;
    Ok(store)
}

/// Fetches every configured feed concurrently, then normalizes and appends
/// the results one feed at a time.
#[tracing::instrument(skip(agencies, store))]
async fn ingest(
    agencies: &AgencyTable,
    store: &mut SqliteStore,
    only: Option<&str>,
    concurrency: usize,
    sample_rate: u64,
    num_samples: usize,
) -> Result<()> {
    let schedule = Arc::new(load_snapshot(agencies));
    let pipeline = Pipeline::new(agencies, schedule);

    let feeds: Vec<_> = agencies
        .iter()
        .filter(|a| only.is_none_or(|label| label == a.label()))
        .flat_map(|a| a.config.feeds.iter().map(move |f| (a.label().to_string(), f.clone())))
        .collect();
    if feeds.is_empty() {
        warn!("No feeds configured");
        return Ok(());
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut sample_count = 0;

    loop {
        // Check if we've reached the sample limit (0 = infinite)
        if num_samples > 0 && sample_count >= num_samples {
            break;
        }
        sample_count += 1;
        info!(sample = sample_count, feeds = feeds.len(), "Starting sample round");

        let mut tasks = vec![];
        for (agency, feed) in &feeds {
            let sem = semaphore.clone();
            let agency = agency.clone();
            let feed = feed.clone();
            let feed_span = tracing::info_span!(
                "fetch_feed",
                agency = %agency,
                line_group = feed.line_group.as_deref().unwrap_or(""),
            );

            let task = tokio::spawn(
                async move {
                    let _permit = sem.acquire().await?;
                    let client = client_for(&feed)?;
                    let fetched_at = Utc::now();
                    let bytes: Bytes = fetch_bytes(client.as_ref(), &feed.url).await?;
                    debug!(bytes = bytes.len(), "Feed bytes received");
                    anyhow::Ok((agency, feed.line_group, fetched_at, bytes))
                }
                .instrument(feed_span),
            );
            tasks.push(task);
        }

        let mut total = IngestDiagnostics::default();
        for task in tasks {
            let (agency, line_group, fetched_at, bytes) = match task.await {
                Ok(Ok(fetched)) => fetched,
                Ok(Err(e)) => {
                    error!(error = %e, "Feed fetch failed");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Feed task panicked");
                    continue;
                }
            };
            let feed = match parse_feed(&bytes) {
                Ok(feed) => feed,
                Err(e) => {
                    error!(agency = %agency, error = %e, "Feed parse failed");
                    continue;
                }
            };

            let raw = extract_trip_updates(&feed, &agency, line_group.as_deref());
            let diagnostics = pipeline
                .ingest(&raw, fetched_at, &mut *store)
                .with_context(|| format!("Failed to store trip updates for {agency}"))?;
            info!(
                agency = %agency,
                line_group = line_group.as_deref().unwrap_or(""),
                fetched = diagnostics.fetched,
                dropped_malformed = diagnostics.dropped_malformed,
                appended = diagnostics.appended,
                duplicates = diagnostics.duplicates,
                "Feed ingested"
            );
            total.merge(diagnostics);
        }
        info!(
            fetched = total.fetched,
            appended = total.appended,
            duplicates = total.duplicates,
            "Sample round complete"
        );

        // If not the last sample, wait before next iteration
        if num_samples == 0 || sample_count < num_samples {
            info!(sample_rate, "Waiting before next sample");
            tokio::time::sleep(tokio::time::Duration::from_secs(sample_rate)).await;
        }
    }

    Ok(())
}
