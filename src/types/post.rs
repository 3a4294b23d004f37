//! Post identifiers and raw corpus records.

use serde::{Deserialize, Serialize};

use super::edge::EdgeKind;

/// Unique identifier of a post in the corpus.
///
/// Wraps the raw integer id so reference fields, edge endpoints, and walk
/// layers cannot be mixed up with counts or offsets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl PostId {
    /// Create a post id from its raw integer form.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw integer form, as it appears in corpus JSON.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for PostId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One post as it appears in the raw JSONL corpus.
///
/// Only the fields the pipeline consumes are modeled; the corpus carries
/// text, timestamps, and engagement counts that are ignored on parse.
/// Reference fields may point at posts outside the known corpus — dangling
/// references are normal, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Unique post id. Required; records without it are counted as invalid.
    pub post_id: PostId,
    /// Author id, used by the per-user partitioner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    /// Post this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<PostId>,
    /// Post this one quotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes: Option<PostId>,
    /// Post this one reposts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost_from: Option<PostId>,
}

impl PostRecord {
    /// Outgoing references in the fixed extraction order:
    /// reply_to, then quotes, then repost_from.
    ///
    /// The extraction order determines edge-file order, which in turn
    /// determines neighbor order in the reverse index, so it must never
    /// change.
    pub fn references(&self) -> impl Iterator<Item = (EdgeKind, PostId)> {
        [
            (EdgeKind::Reply, self.reply_to),
            (EdgeKind::Quote, self.quotes),
            (EdgeKind::Repost, self.repost_from),
        ]
        .into_iter()
        .filter_map(|(kind, dst)| dst.map(|d| (kind, d)))
    }

    /// True when the post has no outgoing reference at all.
    pub fn has_no_references(&self) -> bool {
        self.reply_to.is_none() && self.quotes.is_none() && self.repost_from.is_none()
    }
}
