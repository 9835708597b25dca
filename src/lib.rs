//! # news-ingest
//!
//! Client-side streaming ingestion engine for news-aggregation applications.
//!
//! The backend reports aggregation results progressively, source by source,
//! over a long-lived streaming connection. This crate owns the client side
//! of that conversation: it opens the stream, merges partial results into a
//! deduplicated working set, tracks coarse-grained progress, and recovers
//! from transient failures with bounded exponential backoff - without
//! duplicating work or corrupting state when a session is restarted,
//! retried, or cancelled mid-flight.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **One session at a time** - a controller runs a single logical session;
//!   state is owned exclusively by it and observed through callbacks
//! - **Cancellation-safe** - an explicit token is checked at every routing
//!   boundary, so no callback fires after an abort
//!
//! ## Quick Start
//!
//! ```no_run
//! use news_ingest::{
//!     Config, EventSink, HttpStreamTransport, IngestOptions, SessionController,
//! };
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_progress(&self, progress: news_ingest::ProgressState) {
//!         println!("{}", progress.message);
//!     }
//!     fn on_source_complete(&self, source: &str, articles: Vec<news_ingest::Article>) {
//!         println!("{source}: {} new articles", articles.len());
//!     }
//!     fn on_error(&self, message: &str) {
//!         eprintln!("error: {message}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let transport = Arc::new(HttpStreamTransport::new(config.transport.clone())?);
//!     let controller = SessionController::new(config, transport)?;
//!
//!     controller
//!         .start(IngestOptions::default(), Arc::new(Printer))
//!         .await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-session cancellation coordination
pub mod cancel;
/// Configuration types
pub mod config;
/// Two-key deduplication of streamed articles
pub mod dedup;
/// Error types
pub mod error;
/// Monotone progress tracking
pub mod progress;
/// Retry policy with exponential backoff
pub mod retry;
/// Session controller and event contracts
pub mod session;
/// Shared snapshot store with subscriber broadcast
pub mod store;
/// Streaming transport to the ingestion backend
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use cancel::CancelCoordinator;
pub use config::{CachePreference, Config, IngestOptions, RetryConfig, TransportConfig};
pub use dedup::Deduplicator;
pub use error::{Error, Result};
pub use progress::ProgressTracker;
pub use retry::{IsRetryable, RetryDecision, RetryPolicy};
pub use session::{EventSink, SessionController, SessionSnapshot};
pub use store::SharedStore;
pub use transport::{HttpStreamTransport, MessageStream, StreamTransport};
pub use types::{
    Article, ArticleId, ArticlePatch, IngestSummary, LifecycleState, PatchField, ProgressState,
    SessionId, StreamMessage,
};
