//! Core types for the walk pipeline.
//!
//! ## Module Organization
//!
//! - [`post`]: Post identifiers and raw corpus records
//! - [`edge`]: Reference edges and their persisted wire form
//! - [`walk`]: Per-root traversal results

pub mod edge;
pub mod post;
pub mod walk;

pub use edge::{Edge, EdgeKind, EdgeRecord};
pub use post::{PostId, PostRecord};
pub use walk::WalkRecord;
