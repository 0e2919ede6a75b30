//! Core domain types for sitekb knowledge bases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// KbStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a knowledge base.
///
/// The lifecycle moves forward only: `Queued -> Crawling -> Indexing ->
/// Active`, with `Failed` reachable from any non-terminal state. `Active`
/// and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KbStatus {
    Queued,
    Crawling,
    Indexing,
    Active,
    Failed,
}

impl KbStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: KbStatus) -> bool {
        use KbStatus::*;
        match (self, next) {
            (Queued, Crawling) => true,
            (Crawling, Indexing) => true,
            (Indexing, Active) => true,
            (Queued | Crawling | Indexing, Failed) => true,
            _ => false,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, KbStatus::Active | KbStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KbStatus::Queued => "QUEUED",
            KbStatus::Crawling => "CRAWLING",
            KbStatus::Indexing => "INDEXING",
            KbStatus::Active => "ACTIVE",
            KbStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for KbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KbStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(KbStatus::Queued),
            "CRAWLING" => Ok(KbStatus::Crawling),
            "INDEXING" => Ok(KbStatus::Indexing),
            "ACTIVE" => Ok(KbStatus::Active),
            "FAILED" => Ok(KbStatus::Failed),
            other => Err(format!("unknown kb status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// KbId
// ---------------------------------------------------------------------------

/// Knowledge base identifier, derived from the seed URL's domain and the
/// creation timestamp (e.g. `kb_docs_example_com_1724800000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KbId(pub String);

impl KbId {
    /// Derive an identifier from a seed URL at the current time.
    pub fn derive(url: &url::Url) -> Self {
        Self::derive_at(url, Utc::now())
    }

    /// Derive an identifier from a seed URL at a fixed instant.
    pub fn derive_at(url: &url::Url, at: DateTime<Utc>) -> Self {
        let domain = url.host_str().unwrap_or("unknown").replace('.', "_");
        Self(format!("kb_{domain}_{}", at.timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for KbId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// KnowledgeBaseEntry
// ---------------------------------------------------------------------------

/// A knowledge base record as tracked by the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    /// Unique identifier for this KB.
    pub kb_id: KbId,
    /// The seed URL the KB was built from.
    pub url: String,
    /// Current lifecycle status.
    pub status: KbStatus,
    /// Pages successfully indexed so far.
    pub indexed_pages: u32,
    /// Total pages fetched by the crawl.
    pub total_pages: u32,
    /// Failure message, set when status is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the KB was first created.
    pub created_at: DateTime<Utc>,
    /// When the KB was last updated.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata (vector resource names, crawl settings used).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// A single crawled page. Transient: pages flow from the crawler into the
/// chunker and are not persisted themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Normalized page URL.
    pub url: String,
    /// Page title from `<title>`, empty when absent.
    pub title: String,
    /// Cleaned visible text.
    pub content: String,
    /// Length of `content` in chars.
    pub content_length: usize,
    /// When the page was fetched.
    pub crawled_at: DateTime<Utc>,
    /// SHA-256 hash of the cleaned text.
    pub content_hash: String,
    /// Same-domain absolute links found on the page.
    pub links: Vec<String>,
}

// ---------------------------------------------------------------------------
// ChunkRecord
// ---------------------------------------------------------------------------

/// A chunk of page text persisted alongside its vector datapoint.
///
/// The chunk id is `<sha256(source_url)>_<index>`, deterministic so a
/// re-ingest of the same page overwrites rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic chunk identifier.
    pub id: String,
    /// Owning knowledge base.
    pub kb_id: KbId,
    /// Chunk text.
    pub content: String,
    /// URL of the page the chunk came from.
    pub source_url: String,
    /// Title of the source page.
    pub title: String,
}

/// Compute the deterministic id for chunk `index` of the page at `url`.
pub fn chunk_id(url: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}_{index}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Vector types
// ---------------------------------------------------------------------------

/// An id + vector pair sent to the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datapoint {
    pub id: String,
    pub vector: Vec<f32>,
}

/// A nearest-neighbor hit from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub chunk_id: String,
    pub distance: f32,
}

/// A fully resolved retrieval result returned to callers.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub source_url: String,
    pub title: String,
    pub distance: f32,
}
