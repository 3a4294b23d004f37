//! Edge types for the post reference graph.

use serde::{Deserialize, Serialize};

use super::post::PostId;

/// Kind of reference relation between two posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Direct reply to another post.
    Reply,
    /// Quote of another post.
    Quote,
    /// Repost of another post.
    Repost,
}

impl EdgeKind {
    /// Parse an edge kind from its corpus field name or label.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reply" | "reply_to" => Some(Self::Reply),
            "quote" | "quotes" => Some(Self::Quote),
            "repost" | "repost_from" => Some(Self::Repost),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reply => write!(f, "reply"),
            Self::Quote => write!(f, "quote"),
            Self::Repost => write!(f, "repost"),
        }
    }
}

/// Directed reference edge from one post to the post it references.
///
/// Implements `Ord` for deterministic ordering: (src, dst, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Referencing post (source).
    pub src: PostId,
    /// Referenced post (target). Need not exist in the known corpus.
    pub dst: PostId,
    /// Kind of reference.
    pub kind: EdgeKind,
}

impl Edge {
    /// Create a new edge.
    pub fn new(src: PostId, dst: PostId, kind: EdgeKind) -> Self {
        Self { src, dst, kind }
    }

    /// Wire form of this edge, as persisted in the edge file.
    pub fn to_record(self) -> EdgeRecord {
        EdgeRecord {
            src: self.src,
            dst: self.dst,
        }
    }
}

// Canonical ordering: src, then dst, then kind
impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.src.cmp(&other.src) {
            std::cmp::Ordering::Equal => match self.dst.cmp(&other.dst) {
                std::cmp::Ordering::Equal => self.kind.cmp(&other.kind),
                ord => ord,
            },
            ord => ord,
        }
    }
}

/// Persisted edge record: one JSON object per line of the edge file.
///
/// The reference kind is not persisted; downstream consumers key only on
/// (src, dst). Kind-awareness stays available in-process via [`Edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Referencing post.
    pub src: PostId,
    /// Referenced post.
    pub dst: PostId,
}

impl From<Edge> for EdgeRecord {
    fn from(edge: Edge) -> Self {
        edge.to_record()
    }
}
