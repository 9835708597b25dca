//! Session controller: the streaming ingestion state machine
//!
//! One controller instance runs at most one logical session at a time. A
//! session opens the transport with a fresh cancellation token, routes each
//! upstream message to the deduplicator, progress tracker and event sink,
//! and on transport failure consults the retry policy before deciding
//! between a delayed restart and a terminal error.
//!
//! State is owned exclusively by the controller and mutated only on its
//! routing task; the surrounding application observes effects through
//! [`EventSink`] callbacks or the read-only [`SessionSnapshot`].

use crate::cancel::CancelCoordinator;
use crate::config::{Config, IngestOptions};
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::StreamTransport;
use crate::types::{
    Article, ArticlePatch, LifecycleState, PatchField, ProgressState, SessionId, StreamMessage,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Callbacks through which the controller reports to the application
///
/// Supplied by the caller at `start` time. Each callback is invoked at most
/// once per upstream message, and never after [`SessionController::detach`]
/// has signalled teardown.
pub trait EventSink: Send + Sync {
    /// Progress counters changed
    fn on_progress(&self, progress: ProgressState);

    /// A source finished; `articles` contains only the deduplicated novel records
    fn on_source_complete(&self, source: &str, articles: Vec<Article>);

    /// An error was recorded (per-source failure, terminal exhaustion, or
    /// immediate abort)
    fn on_error(&self, message: &str);
}

/// Read-only view of the current session's state
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    /// Current lifecycle state
    pub lifecycle: LifecycleState,
    /// Backend-assigned identifier (None before the transport confirms open)
    pub session_id: Option<SessionId>,
    /// Retries performed so far this session
    pub retry_count: u32,
    /// Current progress counters and status line
    pub progress: ProgressState,
    /// Deduplicated accumulation of admitted articles
    pub admitted: Vec<Article>,
    /// Ordered, append-only error log for this session
    pub errors: Vec<String>,
}

/// State owned exclusively by one controller instance
struct SessionState {
    lifecycle: LifecycleState,
    session_id: Option<SessionId>,
    retry_count: u32,
    dedup: Deduplicator,
    progress: ProgressTracker,
    admitted: Vec<Article>,
    errors: Vec<String>,
    cancel: CancelCoordinator,
    sink: Option<Arc<dyn EventSink>>,
    // Bumped on every accepted start; a routing task whose generation no
    // longer matches must not touch state.
    generation: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Idle,
            session_id: None,
            retry_count: 0,
            dedup: Deduplicator::new(),
            progress: ProgressTracker::new(),
            admitted: Vec::new(),
            errors: Vec::new(),
            cancel: CancelCoordinator::new(),
            sink: None,
            generation: 0,
        }
    }
}

/// Outcome of one transport attempt
enum AttemptOutcome {
    Complete,
    Cancelled,
}

/// The streaming ingestion controller (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct SessionController {
    transport: Arc<dyn StreamTransport>,
    policy: RetryPolicy,
    state: Arc<tokio::sync::Mutex<SessionState>>,
    /// Liveness flag, distinct from the cancellation token: teardown can
    /// race message delivery even without an explicit abort.
    alive: Arc<AtomicBool>,
}

impl SessionController {
    /// Create a controller over the given transport
    ///
    /// Validates the configuration up front so a bad endpoint or retry
    /// policy fails at construction rather than mid-session.
    pub fn new(config: Config, transport: Arc<dyn StreamTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            policy: RetryPolicy::new(config.retry),
            state: Arc::new(tokio::sync::Mutex::new(SessionState::new())),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Begin a streaming session
    ///
    /// A start request while a session is `Starting`/`Loading`/`Retrying` is
    /// rejected with a logged warning - not queued, and not an error to the
    /// caller. Otherwise the Admitted Set, progress, error log and retry
    /// count are reset, a fresh cancellation token is issued, and the
    /// routing task is spawned.
    pub async fn start(&self, options: IngestOptions, sink: Arc<dyn EventSink>) {
        let (token, generation) = {
            let mut state = self.state.lock().await;
            if state.lifecycle.is_active() {
                tracing::warn!(
                    lifecycle = ?state.lifecycle,
                    "session already in flight, ignoring start request"
                );
                return;
            }
            state.lifecycle = LifecycleState::Starting;
            state.session_id = None;
            state.retry_count = 0;
            state.dedup.reset();
            state.progress.reset();
            state.admitted.clear();
            state.errors.clear();
            state.sink = Some(sink);
            state.generation += 1;
            (state.cancel.issue(), state.generation)
        };

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run(options, token, generation).await;
        });
    }

    /// Request cancellation of the active session
    ///
    /// The token is triggered synchronously; ceasing to read transport
    /// messages is observed at the next suspension point. With
    /// `immediate = true` an error record is also appended and surfaced via
    /// `on_error` - used when cancellation is itself an unexpected condition
    /// (e.g. a category switch mid-stream) rather than ordinary unmount
    /// cleanup. Aborting with no active session is a no-op.
    pub async fn abort(&self, immediate: bool) {
        let (sink, message) = {
            let mut state = self.state.lock().await;
            if !state.lifecycle.is_active() {
                tracing::debug!(
                    lifecycle = ?state.lifecycle,
                    "abort requested with no active session"
                );
                return;
            }
            state.cancel.cancel();
            state.lifecycle = LifecycleState::Cancelled;
            tracing::info!(immediate, "session aborted");

            if immediate {
                let message = "ingestion aborted before completion".to_string();
                state.errors.push(message.clone());
                (state.sink.clone(), Some(message))
            } else {
                (None, None)
            }
        };

        if let (Some(sink), Some(message)) = (sink, message) {
            self.dispatch(&sink, |s| s.on_error(&message));
        }
    }

    /// Signal that the consuming component is being torn down
    ///
    /// After this, no callback fires - even for messages already buffered in
    /// flight. Does not cancel the session itself; pair with
    /// [`abort`](Self::abort) for that.
    pub fn detach(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Clear the session's error log
    pub async fn clear_errors(&self) {
        self.state.lock().await.errors.clear();
    }

    /// Remove all entries matching `message` from the error log
    pub async fn remove_error(&self, message: &str) {
        self.state.lock().await.errors.retain(|e| e != message);
    }

    /// Read-only snapshot of the current session state
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            lifecycle: state.lifecycle,
            session_id: state.session_id.clone(),
            retry_count: state.retry_count,
            progress: state.progress.state().clone(),
            admitted: state.admitted.clone(),
            errors: state.errors.clone(),
        }
    }

    /// Apply a side-channel field patch to an already-admitted article
    ///
    /// Forwards the patched field onto the admitted record; never re-runs
    /// deduplication or progress logic. Returns true if a record was
    /// patched, false if the key is unknown (logged at debug level).
    pub async fn apply_patch(&self, patch: ArticlePatch) -> bool {
        let mut state = self.state.lock().await;
        let Some(article) = state.admitted.iter_mut().find(|a| a.id == patch.id) else {
            tracing::debug!(article_id = %patch.id, "patch for unadmitted article ignored");
            return false;
        };
        match patch.field {
            PatchField::Thumbnail(url) => article.thumbnail = Some(url),
            PatchField::Summary(text) => article.summary = Some(text),
        }
        true
    }

    /// Retry-driving loop around individual transport attempts
    async fn run(&self, options: IngestOptions, token: CancellationToken, generation: u64) {
        let mut attempt: u32 = 0;
        loop {
            let cause = match self.run_attempt(&options, &token, generation).await {
                Ok(AttemptOutcome::Complete) => return,
                Ok(AttemptOutcome::Cancelled) => {
                    // abort() already moved the lifecycle to Cancelled; this
                    // covers the window where the token is triggered but the
                    // state write raced the routing task.
                    self.with_state(generation, |s| {
                        if s.lifecycle.is_active() {
                            s.lifecycle = LifecycleState::Cancelled;
                        }
                    })
                    .await;
                    return;
                }
                Err(cause) => cause,
            };

            if token.is_cancelled() || cause.is_cancellation() {
                return;
            }

            match self.policy.evaluate(attempt, &cause) {
                RetryDecision::RetryAfter(delay) => {
                    attempt += 1;
                    // Failures from earlier attempts stay visible in the
                    // error log; only a brand-new session start clears them.
                    let message = cause.to_string();
                    let sink = self
                        .with_state(generation, |s| {
                            s.lifecycle = LifecycleState::Retrying(attempt);
                            s.retry_count = attempt;
                            s.errors.push(message.clone());
                            s.sink.clone()
                        })
                        .await
                        .flatten();
                    if let Some(sink) = sink
                        && !token.is_cancelled()
                    {
                        self.dispatch(&sink, |s| s.on_error(&message));
                    }

                    tokio::time::sleep(delay).await;

                    // The delayed restart re-tests the token: a cancellation
                    // observed while Retrying must not fire the restart.
                    if token.is_cancelled() {
                        tracing::debug!("cancellation observed during backoff, not restarting");
                        return;
                    }
                }
                RetryDecision::GiveUp => {
                    let terminal = if attempt >= self.policy.max_attempts() {
                        Error::RetriesExhausted {
                            attempts: attempt,
                            cause: cause.to_string(),
                        }
                    } else {
                        cause
                    };
                    let message = terminal.to_string();
                    tracing::error!(error = %message, "session failed");

                    let sink = self
                        .with_state(generation, |s| {
                            s.lifecycle = LifecycleState::Error;
                            s.errors.push(message.clone());
                            s.sink.clone()
                        })
                        .await
                        .flatten();
                    if let Some(sink) = sink {
                        self.dispatch(&sink, |s| s.on_error(&message));
                    }
                    return;
                }
            }
        }
    }

    /// One transport attempt: open the stream and route messages until a
    /// terminal message, a failure, or cancellation.
    async fn run_attempt(
        &self,
        options: &IngestOptions,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<AttemptOutcome> {
        // A retry restarts ingestion from zero: the Admitted Set and
        // progress are emptied before the first new message, the error log
        // deliberately is not.
        self.with_state(generation, |s| {
            s.lifecycle = LifecycleState::Starting;
            s.session_id = None;
            s.dedup.reset();
            s.progress.reset();
            s.admitted.clear();
        })
        .await;

        if token.is_cancelled() {
            return Ok(AttemptOutcome::Cancelled);
        }

        let (session_id, mut stream) = tokio::select! {
            _ = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
            opened = self.transport.open(options) => opened?,
        };

        tracing::info!(session_id = %session_id, "stream opened");
        self.with_state(generation, |s| {
            s.session_id = Some(session_id);
            s.lifecycle = LifecycleState::Loading;
        })
        .await;

        loop {
            // Dropping `stream` on cancellation closes the connection.
            let item = tokio::select! {
                _ = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
                item = stream.next() => item,
            };

            let message = match item {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::Transport(
                        "stream ended without a terminal message".to_string(),
                    ));
                }
            };

            if self.route(message, token, generation).await? {
                return Ok(AttemptOutcome::Complete);
            }
        }
    }

    /// Route one upstream message; returns true on the terminal message
    ///
    /// The match is total over [`StreamMessage`] so a new message kind
    /// cannot be silently dropped. The cancellation token is re-tested under
    /// the state lock before any mutation, and again before each callback.
    async fn route(
        &self,
        message: StreamMessage,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<bool> {
        match message {
            StreamMessage::Progress {
                completed,
                total,
                message,
            } => {
                let updated = self
                    .with_state(generation, |s| {
                        if token.is_cancelled() {
                            return None;
                        }
                        Some((s.progress.apply(completed, total, message), s.sink.clone()))
                    })
                    .await
                    .flatten();
                if let Some((progress, Some(sink))) = updated
                    && !token.is_cancelled()
                {
                    self.dispatch(&sink, |s| s.on_progress(progress));
                }
                Ok(false)
            }

            StreamMessage::SourceComplete { source, articles } => {
                let admitted = self
                    .with_state(generation, |s| {
                        if token.is_cancelled() {
                            return None;
                        }
                        let novel = s.dedup.admit(articles);
                        s.admitted.extend(novel.iter().cloned());
                        Some((novel, s.sink.clone()))
                    })
                    .await
                    .flatten();
                if let Some((novel, Some(sink))) = admitted
                    && !token.is_cancelled()
                {
                    tracing::debug!(source = %source, novel = novel.len(), "source batch admitted");
                    self.dispatch(&sink, |s| s.on_source_complete(&source, novel));
                }
                Ok(false)
            }

            StreamMessage::SourceError {
                source,
                message: error,
            } => {
                // A single failed source never fails the session.
                let recorded = format!("{source}: {error}");
                tracing::warn!(source = %source, error = %error, "source failed, continuing");
                let sink = self
                    .with_state(generation, |s| {
                        if token.is_cancelled() {
                            return None;
                        }
                        s.errors.push(recorded.clone());
                        s.sink.clone()
                    })
                    .await
                    .flatten();
                if let Some(sink) = sink
                    && !token.is_cancelled()
                {
                    self.dispatch(&sink, |s| s.on_error(&recorded));
                }
                Ok(false)
            }

            StreamMessage::Done { summary } => {
                tracing::info!(
                    sources = summary.sources,
                    articles = summary.articles,
                    errors = summary.errors,
                    "ingestion complete"
                );
                self.with_state(generation, |s| {
                    if !token.is_cancelled() {
                        s.lifecycle = LifecycleState::Complete;
                    }
                })
                .await;
                Ok(true)
            }
        }
    }

    /// Run a state mutation only if the session generation still matches
    ///
    /// A stale routing task (superseded by a newer `start`) gets `None` and
    /// must not observe or mutate the new session's state.
    async fn with_state<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            tracing::debug!(
                stale = generation,
                current = state.generation,
                "ignoring state access from superseded session task"
            );
            return None;
        }
        Some(f(&mut state))
    }

    /// Invoke a callback unless the consumer has signalled teardown
    fn dispatch(&self, sink: &Arc<dyn EventSink>, f: impl FnOnce(&dyn EventSink)) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        f(sink.as_ref());
    }
}
