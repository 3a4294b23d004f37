//! Walk Pipeline Binary
//!
//! Runs the thread-reconstruction stages as a batch job:
//! - Structured JSON logging for log aggregation
//! - Artifact reuse and resume on restart
//! - Non-zero exit when any batch fails
//!
//! ## Configuration
//!
//! Environment variables (beyond those of `PipelineConfig`):
//! - `WALK_STAGE`: "pipeline" (default), "partition", or "minimize"
//! - `WALK_PARTITION_DIR`: Per-user output directory (default: by_user)
//! - `WALK_PARTITION_CHECKPOINT`: Optional offset-marker path for partition
//! - `WALK_HANDLE_DISCIPLINE`: "global" (default) or "per_worker"
//! - `WALK_MINIMIZED`: Minimized corpus output (default: minimized.jsonl)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! WALK_POSTS=posts.jsonl cargo run --bin walk_pipeline
//! ```

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use threadwalk::minimize::{load_exclusions, minimize_corpus};
use threadwalk::partition::{partition_by_user, PartitionConfig};
use threadwalk::{BatchDriver, HandleDiscipline, PipelineConfig, WalkPipeline};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    if log_format == "pretty" {
        // Pretty format for local development
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        // JSON format for production
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

fn run_pipeline(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let summary = WalkPipeline::new(config)?.run()?;
    info!(
        roots = summary.roots_total,
        walks = summary.walks_written,
        skipped = summary.skipped_existing,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "walk pipeline finished"
    );
    Ok(())
}

fn run_partition(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let discipline: HandleDiscipline = std::env::var("WALK_HANDLE_DISCIPLINE")
        .ok()
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or_default();

    let partition = PartitionConfig {
        input: config.posts.clone(),
        out_dir: std::env::var("WALK_PARTITION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("by_user")),
        max_open: config.max_open,
        discipline,
        checkpoint: std::env::var("WALK_PARTITION_CHECKPOINT")
            .ok()
            .map(PathBuf::from),
    };

    let driver = BatchDriver::new(config.workers, config.batch_size)?;
    let (stats, report) = partition_by_user(&driver, &partition)?;
    info!(
        written = stats.written,
        skipped = stats.skipped,
        "partition finished"
    );
    if !report.all_ok() {
        return Err(format!("{} partition batch(es) failed", report.failures.len()).into());
    }
    Ok(())
}

fn run_minimize(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let input_dir = std::env::var("WALK_PARTITION_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("by_user"));
    let output = std::env::var("WALK_MINIMIZED")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("minimized.jsonl"));

    let exclusions = load_exclusions(&config.threadless)?;
    let driver = BatchDriver::new(config.workers, config.batch_size)?;
    let (stats, report) = minimize_corpus(&driver, &input_dir, &output, exclusions)?;
    info!(
        kept = stats.kept,
        removed = stats.removed,
        invalid = stats.invalid,
        "minimization finished"
    );
    if !report.all_ok() {
        return Err(format!("{} minimize batch(es) failed", report.failures.len()).into());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    init_tracing();

    info!(version = threadwalk::VERSION, "Starting walk pipeline");

    let config = PipelineConfig::from_env()?;
    let stage = std::env::var("WALK_STAGE").unwrap_or_else(|_| "pipeline".to_string());

    let result = match stage.as_str() {
        "pipeline" => run_pipeline(config),
        "partition" => run_partition(&config),
        "minimize" => run_minimize(&config),
        other => Err(format!("unknown stage: {other}").into()),
    };

    if let Err(e) = &result {
        error!(error = %e, stage = %stage, "run failed");
    }
    result
}
