//! # threadwalk
//!
//! Reverse-reference thread reconstruction over social post corpora.
//!
//! Given a JSONL corpus of posts whose reference fields (`reply_to`,
//! `quotes`, `repost_from`) point *backwards* in time, threadwalk inverts
//! the reference graph and walks it forward, reconstructing every thread as
//! a layered breadth-first walk from its root.
//!
//! ## Pipeline
//!
//! ```text
//! posts.jsonl → extract → edges.jsonl + roots.jsonl + threadless.jsonl
//!                  ↓
//!            ReverseIndex (reverse_edges.jsonl snapshot)
//!                  ↓
//!       BatchDriver × WalkEngine → walks.jsonl + reverse_walks/<id>.json
//! ```
//!
//! Alongside the traversal pipeline, the crate carries the corpus-shaping
//! stages: per-user partitioning through a bounded file-handle cache, and
//! minimization of the partitioned corpus against the threadless lookup.
//!
//! ## Determinism Guarantees
//!
//! - Extraction emits edges in fixed field order (reply_to, quotes,
//!   repost_from), so re-extraction over unchanged input is byte-identical
//! - The reverse index preserves edge-file order per target, through
//!   persistence and reload
//! - Same root + same index → identical walk record
//!
//! ## Durability
//!
//! Every artifact is committed atomically (temp file + rename); the
//! aggregated walks file doubles as the resume marker, so an interrupted
//! run skips the roots it already finished.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod driver;
pub mod extract;
pub mod handles;
pub mod index;
pub mod minimize;
pub mod partition;
pub mod pipeline;
pub mod roots;
pub mod types;
pub mod walk;

// Re-exports
pub use config::{ConfigError, PipelineConfig};
pub use driver::{BatchDriver, DriverError, DriverReport};
pub use handles::{FileHandleCache, HandleDiscipline, HandleError};
pub use index::{AdjacencySource, IndexError, ReverseIndex};
pub use pipeline::{PipelineError, RunSummary, WalkPipeline};
pub use types::{Edge, EdgeKind, EdgeRecord, PostId, PostRecord, WalkRecord};
pub use walk::WalkEngine;

/// Crate version, surfaced in run logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
