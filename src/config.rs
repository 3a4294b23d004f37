//! Pipeline configuration.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `WALK_POSTS`: Input corpus path (default: posts.jsonl)
//! - `WALK_EDGES`: Edge artifact path (default: edges.jsonl)
//! - `WALK_ROOTS`: Root-id artifact path (default: roots.jsonl)
//! - `WALK_THREADLESS`: Threadless-id artifact path (default: threadless.jsonl)
//! - `WALK_SNAPSHOT`: Reverse-index snapshot path (default: reverse_edges.jsonl)
//! - `WALK_OUTPUT`: Aggregated walks path (default: walks.jsonl)
//! - `WALK_DIR`: Per-root walk directory (default: reverse_walks)
//! - `WALK_WORKERS`: Worker thread count (default: 4)
//! - `WALK_BATCH_SIZE`: Roots per batch (default: 1000)
//! - `WALK_MAX_OPEN`: Open-handle bound for partitioning (default: 100)
//! - `WALK_MAX_DEPTH`: Optional traversal depth bound (default: unbounded)

use std::path::PathBuf;

/// Errors from configuration validation.
///
/// Validation runs before any work starts, so a bad value never leaves
/// partial artifacts behind.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Worker count of zero can never make progress.
    #[error("worker count must be non-zero")]
    ZeroWorkers,
    /// Batch size of zero can never make progress.
    #[error("batch size must be non-zero")]
    ZeroBatchSize,
    /// Handle bound of zero can never make progress.
    #[error("max open handles must be non-zero")]
    ZeroMaxOpen,
    /// An environment value failed to parse as the expected type.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Environment variable name.
        var: &'static str,
        /// The unparseable value.
        value: String,
    },
}

/// Configuration for a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input corpus (JSONL, one post per line).
    pub posts: PathBuf,
    /// Extracted edge artifact.
    pub edges: PathBuf,
    /// Root post ids, one JSON integer per line.
    pub roots: PathBuf,
    /// Threadless post ids, one id per line.
    pub threadless: PathBuf,
    /// Reverse-index snapshot.
    pub snapshot: PathBuf,
    /// Aggregated walk records.
    pub walks: PathBuf,
    /// Directory for per-root walk files.
    pub walks_dir: PathBuf,
    /// Worker thread count.
    pub workers: usize,
    /// Roots dispatched per batch.
    pub batch_size: usize,
    /// Open-handle bound for the partition stage.
    pub max_open: usize,
    /// Optional traversal depth bound.
    pub max_depth: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            posts: PathBuf::from("posts.jsonl"),
            edges: PathBuf::from("edges.jsonl"),
            roots: PathBuf::from("roots.jsonl"),
            threadless: PathBuf::from("threadless.jsonl"),
            snapshot: PathBuf::from("reverse_edges.jsonl"),
            walks: PathBuf::from("walks.jsonl"),
            walks_dir: PathBuf::from("reverse_walks"),
            workers: 4,
            batch_size: 1000,
            max_open: 100,
            max_depth: None,
        }
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults, then validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            posts: env_path("WALK_POSTS", "posts.jsonl"),
            edges: env_path("WALK_EDGES", "edges.jsonl"),
            roots: env_path("WALK_ROOTS", "roots.jsonl"),
            threadless: env_path("WALK_THREADLESS", "threadless.jsonl"),
            snapshot: env_path("WALK_SNAPSHOT", "reverse_edges.jsonl"),
            walks: env_path("WALK_OUTPUT", "walks.jsonl"),
            walks_dir: env_path("WALK_DIR", "reverse_walks"),
            workers: env_parse("WALK_WORKERS", defaults.workers)?,
            batch_size: env_parse("WALK_BATCH_SIZE", defaults.batch_size)?,
            max_open: env_parse("WALK_MAX_OPEN", defaults.max_open)?,
            max_depth: match std::env::var("WALK_MAX_DEPTH") {
                Ok(value) => Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "WALK_MAX_DEPTH",
                    value,
                })?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_open == 0 {
            return Err(ConfigError::ZeroMaxOpen);
        }
        Ok(())
    }
}
