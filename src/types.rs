//! Core types for news-ingest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for a streaming session
///
/// Assigned only when the transport confirms the stream has opened. A session
/// that fails before confirmation never receives an identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new SessionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Natural key of an article: the stable identifier assigned upstream
///
/// Independent of the content key (origin URL). Upstream may reassign
/// identifiers between retries while the URL stays stable, and mirrored
/// content may carry the same URL under different identifiers, so neither
/// key alone is authoritative for identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub String);

impl ArticleId {
    /// Create a new ArticleId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ArticleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ArticleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A unit of streamed content: one article reported by an upstream source
///
/// Created when first observed in an upstream batch and never mutated in
/// place by the ingestion core. Field-level patches from the side channel
/// are applied by [`crate::session::SessionController::apply_patch`], not by
/// re-admission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Stable upstream identifier (natural key)
    pub id: ArticleId,

    /// Origin URL (content key)
    pub url: String,

    /// Headline
    pub title: String,

    /// Name of the source that reported this article
    pub source: String,

    /// Short summary or teaser text
    #[serde(default)]
    pub summary: Option<String>,

    /// Thumbnail image URL, possibly patched in later via the side channel
    #[serde(default)]
    pub thumbnail: Option<String>,

    /// Publication timestamp (if the source reported one)
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a streaming session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No session started yet, or state was reset
    Idle,
    /// `start()` accepted; transport not yet confirmed open
    Starting,
    /// Transport open, messages flowing
    Loading,
    /// Transport failed; waiting out the backoff delay before attempt `n`
    Retrying(u32),
    /// Terminal: upstream sent its success summary
    Complete,
    /// Terminal: caller aborted the session
    Cancelled,
    /// Terminal: retries exhausted
    Error,
}

impl LifecycleState {
    /// True while a session is in flight (a concurrent `start` must be rejected)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Loading | LifecycleState::Retrying(_)
        )
    }

    /// True for states that persist until the next `start`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Complete | LifecycleState::Cancelled | LifecycleState::Error
        )
    }
}

/// Coarse-grained ingestion progress
///
/// `completed` is monotonically non-decreasing within a session; the tracker
/// clamps upstream regressions rather than crashing on them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Sources processed so far
    pub completed: u32,

    /// Total sources expected
    pub total: u32,

    /// Human-readable status line, derived when upstream supplies none
    pub message: String,
}

/// Terminal success summary reported by the upstream stream
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Total articles reported across all sources (pre-deduplication)
    pub articles: u32,

    /// Number of sources processed
    pub sources: u32,

    /// Number of sources that failed
    pub errors: u32,
}

/// One message from the upstream stream
///
/// The transport yields these in arrival order; the session controller's
/// routing loop is total over all variants, so adding a kind here forces the
/// routing match to be revisited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Coarse progress notification
    Progress {
        /// Sources processed so far
        completed: u32,
        /// Total sources expected
        total: u32,
        /// Optional human-readable status line
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// One source finished; carries its full batch of articles
    SourceComplete {
        /// Source name (e.g., "bbc")
        source: String,
        /// Articles reported by this source
        articles: Vec<Article>,
    },

    /// One source failed; the session continues for other sources
    SourceError {
        /// Source name
        source: String,
        /// Failure description
        message: String,
    },

    /// Terminal success summary; the session resolves as `Complete`
    Done {
        /// Aggregate summary
        summary: IngestSummary,
    },
}

/// Single-field update for an already-admitted article
///
/// Delivered by a low-priority side channel (e.g., a late-arriving
/// thumbnail). Applied directly to the admitted record; never re-runs
/// deduplication or progress logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArticlePatch {
    /// Natural key of the article to patch
    pub id: ArticleId,

    /// The patched field
    pub field: PatchField,
}

/// Which field an [`ArticlePatch`] updates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum PatchField {
    /// Replace the thumbnail URL
    Thumbnail(String),
    /// Replace the summary text
    Summary(String),
}
