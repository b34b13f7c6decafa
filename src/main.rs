//! CLI entry point for the transit predictor.
//!
//! Provides subcommands for replaying matched AVL reports through the
//! prediction core and for inspecting the statistics caches after warm-up.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_predictor::{
    clock::{Clock, SystemClock, VirtualClock},
    config::CoreConfig,
    engine::Engine,
    persistence::{
        CsvArrivalDepartureSource, CsvRecordSink, MemorySink, QueuedDataLogger, RecordSink,
    },
    replay::{read_reports, replay},
    schedule::{InMemorySchedule, load_schedule_dir},
};

#[derive(Parser)]
#[command(name = "transit_predictor")]
#[command(about = "Real-time vehicle state and arrival prediction engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay matched AVL reports on a virtual clock and write the results as CSV
    Replay {
        /// Directory holding trips.csv, stop_paths.csv and calendar_dates.csv
        #[arg(long)]
        schedule_dir: PathBuf,

        /// CSV of matched AVL reports
        #[arg(long)]
        reports: PathBuf,

        /// Arrival/departure history CSV used to warm the caches
        #[arg(long)]
        history: Option<PathBuf>,

        /// Directory to write one CSV per record kind
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        #[command(flatten)]
        config: CoreConfig,
    },
    /// Warm the caches from history and print cache key counts as JSON
    Inspect {
        /// Arrival/departure history CSV
        #[arg(long)]
        history: PathBuf,

        /// Evaluate as of this epoch time in ms instead of now
        #[arg(long)]
        at_ms: Option<i64>,

        #[command(flatten)]
        config: CoreConfig,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            schedule_dir,
            reports,
            history,
            output_dir,
            config,
        } => {
            run_replay(&schedule_dir, &reports, history.as_deref(), &output_dir, config).await?;
        }
        Commands::Inspect {
            history,
            at_ms,
            config,
        } => {
            let clock: Arc<dyn Clock> = match at_ms {
                Some(at_ms) => Arc::new(VirtualClock::new(at_ms)),
                None => Arc::new(SystemClock),
            };
            let engine = Engine::new(
                config,
                Arc::new(InMemorySchedule::new()),
                Arc::new(MemorySink::new()),
                clock,
            );
            engine.warm_up(&CsvArrivalDepartureSource::new(history)).await?;

            let counts = engine.cache_query_service().key_counts();
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}

/// Logging setup: colored stderr + JSON rolling log file
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_predictor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_predictor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

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

    Ok(file_guard)
}

/// Warms the caches, replays the reports and drains the persistence queue
/// into `output_dir`.
#[tracing::instrument(skip(config), fields(schedule_dir = %schedule_dir.display(), reports = %reports.display()))]
async fn run_replay(
    schedule_dir: &Path,
    reports: &Path,
    history: Option<&Path>,
    output_dir: &Path,
    config: CoreConfig,
) -> Result<()> {
    let schedule = load_schedule_dir(schedule_dir)?;
    let rows = read_reports(reports)?;
    let start_ms = rows.first().map(|r| r.time_ms).unwrap_or_default();
    info!(reports = rows.len(), start_ms, "Replay input loaded");

    let clock = Arc::new(VirtualClock::new(start_ms));
    let logger = Arc::new(QueuedDataLogger::new(config.persistence_queue_capacity));
    let sink: Arc<dyn RecordSink> = Arc::new(CsvRecordSink::new(output_dir)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = tokio::spawn(logger.clone().run_writer(sink, shutdown_rx));

    let engine = Engine::new(config, Arc::new(schedule), logger.clone(), clock.clone());
    if let Some(history) = history {
        engine.warm_up(&CsvArrivalDepartureSource::new(history)).await?;
    }

    let summary = replay(&engine, &clock, rows);

    shutdown_tx.send(true)?;
    writer.await?;
    info!(output_dir = %output_dir.display(), dropped = logger.dropped(), "Finished writing records");

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
