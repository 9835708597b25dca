//! Scenario tests for the session controller, driven by a scripted
//! in-memory transport and a collecting event sink.

use crate::config::{Config, IngestOptions, RetryConfig};
use crate::error::{Error, Result};
use crate::session::{EventSink, SessionController};
use crate::transport::{MessageStream, StreamTransport};
use crate::types::{
    Article, ArticleId, ArticlePatch, IngestSummary, LifecycleState, PatchField, ProgressState,
    SessionId, StreamMessage,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// --- scripted transport ---

enum ScriptedAttempt {
    /// Opening the stream fails outright
    FailOpen(String),
    /// Stream yields these items, then ends (or hangs forever)
    Stream {
        items: Vec<Result<StreamMessage>>,
        then_hang: bool,
    },
    /// Stream fed interactively by the test through a channel
    Channel(mpsc::Receiver<Result<StreamMessage>>),
}

struct ScriptedTransport {
    attempts: std::sync::Mutex<VecDeque<ScriptedAttempt>>,
    opens: AtomicU32,
}

impl ScriptedTransport {
    fn new(attempts: Vec<ScriptedAttempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: std::sync::Mutex::new(attempts.into()),
            opens: AtomicU32::new(0),
        })
    }

    fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, _options: &IngestOptions) -> Result<(SessionId, MessageStream)> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport script exhausted");
        match attempt {
            ScriptedAttempt::FailOpen(message) => Err(Error::Transport(message)),
            ScriptedAttempt::Stream { items, then_hang } => {
                let base = futures::stream::iter(items);
                let stream: MessageStream = if then_hang {
                    Box::pin(base.chain(futures::stream::pending()))
                } else {
                    Box::pin(base)
                };
                Ok((SessionId::new(format!("session-{n}")), stream))
            }
            ScriptedAttempt::Channel(rx) => {
                let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
                Ok((SessionId::new(format!("session-{n}")), Box::pin(stream)))
            }
        }
    }
}

// --- collecting sink ---

#[derive(Clone, Debug, PartialEq)]
enum SinkEvent {
    Progress(ProgressState),
    Source { source: String, ids: Vec<String> },
    Error(String),
}

#[derive(Default)]
struct CollectingSink {
    events: std::sync::Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn error_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Error(_)))
            .count()
    }
}

impl EventSink for CollectingSink {
    fn on_progress(&self, progress: ProgressState) {
        self.events.lock().unwrap().push(SinkEvent::Progress(progress));
    }

    fn on_source_complete(&self, source: &str, articles: Vec<Article>) {
        self.events.lock().unwrap().push(SinkEvent::Source {
            source: source.to_string(),
            ids: articles.iter().map(|a| a.id.to_string()).collect(),
        });
    }

    fn on_error(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Error(message.to_string()));
    }
}

// --- helpers ---

fn article(id: &str, url: &str) -> Article {
    Article {
        id: ArticleId::from(id),
        url: url.to_string(),
        title: format!("headline {id}"),
        source: "bbc".to_string(),
        summary: None,
        thumbnail: None,
        published_at: None,
    }
}

fn fast_config(max_attempts: u32, base_ms: u64) -> Config {
    Config {
        retry: RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Config::default()
    }
}

fn controller(config: Config, transport: Arc<ScriptedTransport>) -> SessionController {
    SessionController::new(config, transport).unwrap()
}

fn done(sources: u32, articles: u32, errors: u32) -> StreamMessage {
    StreamMessage::Done {
        summary: IngestSummary {
            sources,
            articles,
            errors,
        },
    }
}

/// Poll the controller snapshot until `pred` holds or the timeout elapses
async fn wait_for(
    controller: &SessionController,
    timeout: Duration,
    pred: impl Fn(&crate::session::SessionSnapshot) -> bool,
) -> crate::session::SessionSnapshot {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = controller.snapshot().await;
        if pred(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}; last snapshot: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// --- happy path ---

#[tokio::test]
async fn completes_and_admits_deduplicated_articles() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![
            Ok(StreamMessage::Progress {
                completed: 1,
                total: 2,
                message: None,
            }),
            Ok(StreamMessage::SourceComplete {
                source: "bbc".to_string(),
                articles: vec![article("a1", "https://n.example/1")],
            }),
            Ok(StreamMessage::SourceComplete {
                source: "reuters".to_string(),
                // a1 mirrored under a new id: content key catches it
                articles: vec![
                    article("r7", "https://n.example/1"),
                    article("r8", "https://n.example/8"),
                ],
            }),
            Ok(done(2, 3, 0)),
        ],
        then_hang: false,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    let snapshot = wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete
    })
    .await;

    assert_eq!(snapshot.session_id, Some(SessionId::new("session-1")));
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(
        snapshot.admitted.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
        vec!["a1", "r8"],
        "mirrored article must be filtered by its content key"
    );
    assert!(snapshot.errors.is_empty());

    let events = sink.events();
    assert_eq!(
        events[0],
        SinkEvent::Progress(ProgressState {
            completed: 1,
            total: 2,
            message: "1/2 sources processed".to_string(),
        })
    );
    assert_eq!(
        events[1],
        SinkEvent::Source {
            source: "bbc".to_string(),
            ids: vec!["a1".to_string()],
        }
    );
    assert_eq!(
        events[2],
        SinkEvent::Source {
            source: "reuters".to_string(),
            ids: vec!["r8".to_string()],
        },
        "only the novel subset reaches on_source_complete"
    );
}

#[tokio::test]
async fn per_source_error_does_not_fail_the_session() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![
            Ok(StreamMessage::SourceError {
                source: "guardian".to_string(),
                message: "upstream 503".to_string(),
            }),
            Ok(StreamMessage::SourceComplete {
                source: "bbc".to_string(),
                articles: vec![article("a1", "https://n.example/1")],
            }),
            Ok(done(2, 1, 1)),
        ],
        then_hang: false,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    let snapshot = wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete
    })
    .await;

    assert_eq!(snapshot.errors, vec!["guardian: upstream 503".to_string()]);
    assert_eq!(snapshot.admitted.len(), 1, "ingestion continued past the bad source");
    assert_eq!(sink.error_count(), 1);
    assert_eq!(transport.open_count(), 1, "a source error must not trigger a retry");
}

// --- dup-filtered batch, then transport failure, then retry ---

#[tokio::test]
async fn transport_failure_mid_stream_schedules_retry_from_zero() {
    let transport = ScriptedTransport::new(vec![
        ScriptedAttempt::Stream {
            items: vec![
                Ok(StreamMessage::Progress {
                    completed: 1,
                    total: 5,
                    message: None,
                }),
                Ok(StreamMessage::SourceComplete {
                    source: "bbc".to_string(),
                    // second record duplicates the first by natural key
                    articles: vec![
                        article("a1", "https://n.example/1"),
                        article("a1", "https://mirror.example/1"),
                    ],
                }),
                Err(Error::Transport("connection reset".to_string())),
            ],
            then_hang: false,
        },
        // Retry attempt: hang so the test can inspect mid-retry state
        ScriptedAttempt::Stream {
            items: vec![],
            then_hang: true,
        },
    ]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 20), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;

    // After the backoff delay the session re-enters Starting and re-opens
    let snapshot = wait_for(&controller, Duration::from_secs(2), |s| {
        s.session_id == Some(SessionId::new("session-2"))
    })
    .await;

    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(transport.open_count(), 2);
    assert_eq!(sink.error_count(), 1, "the transport failure surfaced once via on_error");
    assert!(
        snapshot.errors.iter().any(|e| e.contains("connection reset")),
        "failure from the first attempt stays in the log across the retry: {:?}",
        snapshot.errors
    );

    // A retry restarts ingestion from zero
    assert!(snapshot.admitted.is_empty(), "admitted set cleared for the new attempt");
    assert_eq!(snapshot.progress, ProgressState::default());

    // The first attempt's batch was dup-filtered before the failure
    let sources: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, SinkEvent::Source { .. }))
        .collect();
    assert_eq!(
        sources,
        vec![SinkEvent::Source {
            source: "bbc".to_string(),
            ids: vec!["a1".to_string()],
        }],
        "admitted set size 1 after the batch (dup filtered)"
    );

    controller.abort(false).await;
}

// --- retry bound ---

#[tokio::test]
async fn always_failing_transport_errors_after_exactly_three_retries() {
    let transport = ScriptedTransport::new(vec![
        ScriptedAttempt::FailOpen("down".to_string()),
        ScriptedAttempt::FailOpen("down".to_string()),
        ScriptedAttempt::FailOpen("down".to_string()),
        ScriptedAttempt::FailOpen("down".to_string()),
    ]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 30), transport.clone());

    let started = tokio::time::Instant::now();
    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    let snapshot = wait_for(&controller, Duration::from_secs(5), |s| {
        s.lifecycle == LifecycleState::Error
    })
    .await;
    let elapsed = started.elapsed();

    assert_eq!(snapshot.retry_count, 3);
    assert_eq!(
        transport.open_count(),
        4,
        "initial attempt plus exactly three restarts"
    );
    // Backoff delays base, 2*base, 4*base = 30 + 60 + 120 = 210ms
    assert!(
        elapsed >= Duration::from_millis(210),
        "should wait out the full backoff sequence, waited {elapsed:?}"
    );

    // Three retry failures plus the terminal exhaustion entry
    assert_eq!(snapshot.errors.len(), 4, "log: {:?}", snapshot.errors);
    assert!(
        snapshot.errors[3].contains("3 attempts"),
        "terminal entry names the exhausted bound: {}",
        snapshot.errors[3]
    );
    assert_eq!(sink.error_count(), 4);
    assert!(
        snapshot.session_id.is_none(),
        "a session that never opened has no identifier"
    );
}

// --- cancellation ---

#[tokio::test]
async fn abort_mid_loading_is_final_and_leaves_error_log_unchanged() {
    let (tx, rx) = mpsc::channel(16);
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Channel(rx)]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;

    tx.send(Ok(StreamMessage::Progress {
        completed: 1,
        total: 5,
        message: None,
    }))
    .await
    .unwrap();
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.progress.completed == 1
    })
    .await;

    controller.abort(false).await;
    let events_at_abort = sink.count();

    // Buffered upstream messages still in flight must not produce callbacks
    tx.send(Ok(StreamMessage::Progress {
        completed: 2,
        total: 5,
        message: None,
    }))
    .await
    .ok();
    tx.send(Ok(StreamMessage::SourceComplete {
        source: "bbc".to_string(),
        articles: vec![article("a1", "https://n.example/1")],
    }))
    .await
    .ok();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.lifecycle, LifecycleState::Cancelled);
    assert!(snapshot.errors.is_empty(), "abort(false) appends nothing");
    assert_eq!(
        sink.count(),
        events_at_abort,
        "no callback fires after abort, even for buffered messages"
    );
    assert_eq!(snapshot.progress.completed, 1, "no progress applied after abort");
    assert!(snapshot.admitted.is_empty(), "no admission after abort");
}

#[tokio::test]
async fn abort_immediate_appends_and_surfaces_an_error() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![],
        then_hang: true,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Loading
    })
    .await;

    controller.abort(true).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.lifecycle, LifecycleState::Cancelled);
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(sink.error_count(), 1, "immediate abort surfaces via on_error");
}

#[tokio::test]
async fn cancellation_during_backoff_suppresses_the_pending_restart() {
    let transport = ScriptedTransport::new(vec![
        ScriptedAttempt::FailOpen("down".to_string()),
        // Would be the restart; must never be reached
        ScriptedAttempt::Stream {
            items: vec![],
            then_hang: true,
        },
    ]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 200), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Retrying(1)
    })
    .await;

    controller.abort(false).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        transport.open_count(),
        1,
        "the delayed restart must re-test the token and not fire"
    );
    assert_eq!(
        controller.snapshot().await.lifecycle,
        LifecycleState::Cancelled
    );
}

#[tokio::test]
async fn abort_with_no_active_session_is_a_no_op() {
    let transport = ScriptedTransport::new(vec![]);
    let controller = controller(fast_config(3, 10), transport);

    controller.abort(false).await;
    assert_eq!(controller.snapshot().await.lifecycle, LifecycleState::Idle);
}

// --- detach (liveness, distinct from cancellation) ---

#[tokio::test]
async fn no_callbacks_after_detach_even_without_abort() {
    let (tx, rx) = mpsc::channel(16);
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Channel(rx)]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport);

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Loading
    })
    .await;

    controller.detach();

    tx.send(Ok(StreamMessage::Progress {
        completed: 1,
        total: 5,
        message: None,
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sink.count(), 0, "detached consumer receives nothing");
    // The session itself keeps running: state still advances
    assert_eq!(controller.snapshot().await.progress.completed, 1);
}

// --- concurrent start ---

#[tokio::test]
async fn second_start_while_in_flight_is_rejected_without_disturbing_the_first() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![Ok(StreamMessage::Progress {
            completed: 1,
            total: 5,
            message: None,
        })],
        then_hang: true,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    let before = wait_for(&controller, Duration::from_secs(2), |s| {
        s.progress.completed == 1
    })
    .await;

    let second_sink = CollectingSink::new();
    controller
        .start(IngestOptions::default(), second_sink.clone())
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = controller.snapshot().await;
    assert_eq!(transport.open_count(), 1, "second start must not open a new stream");
    assert_eq!(after.session_id, before.session_id);
    assert_eq!(after.progress, before.progress, "first session undisturbed");
    assert_eq!(second_sink.count(), 0, "rejected start wires up nothing");

    controller.abort(false).await;
}

// --- reset on restart ---

#[tokio::test]
async fn new_session_starts_from_empty_state() {
    let transport = ScriptedTransport::new(vec![
        ScriptedAttempt::Stream {
            items: vec![
                Ok(StreamMessage::SourceError {
                    source: "guardian".to_string(),
                    message: "upstream 503".to_string(),
                }),
                Ok(StreamMessage::SourceComplete {
                    source: "bbc".to_string(),
                    articles: vec![article("a1", "https://n.example/1")],
                }),
                Ok(done(2, 1, 1)),
            ],
            then_hang: false,
        },
        ScriptedAttempt::Stream {
            items: vec![
                Ok(StreamMessage::SourceComplete {
                    source: "bbc".to_string(),
                    articles: vec![article("a1", "https://n.example/1")],
                }),
                Ok(done(1, 1, 0)),
            ],
            then_hang: false,
        },
    ]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport.clone());

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete
    })
    .await;

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    let snapshot = wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete && s.session_id == Some(SessionId::new("session-2"))
    })
    .await;

    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.errors.is_empty(), "error log cleared by the new start");
    assert_eq!(
        snapshot.admitted.len(),
        1,
        "a1 is novel again: no dedup carryover from the prior session"
    );
}

// --- side channel patches ---

#[tokio::test]
async fn patch_updates_an_admitted_article_in_place() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![
            Ok(StreamMessage::SourceComplete {
                source: "bbc".to_string(),
                articles: vec![article("a1", "https://n.example/1")],
            }),
            Ok(done(1, 1, 0)),
        ],
        then_hang: false,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport);

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete
    })
    .await;
    let events_before = sink.count();

    let patched = controller
        .apply_patch(ArticlePatch {
            id: ArticleId::from("a1"),
            field: PatchField::Thumbnail("https://img.example/a1.jpg".to_string()),
        })
        .await;
    assert!(patched);

    let snapshot = controller.snapshot().await;
    assert_eq!(
        snapshot.admitted[0].thumbnail.as_deref(),
        Some("https://img.example/a1.jpg")
    );
    assert_eq!(
        snapshot.admitted.len(),
        1,
        "a patch must not re-admit or duplicate the record"
    );
    assert_eq!(
        sink.count(),
        events_before,
        "patches bypass dedup, progress and event dispatch"
    );
}

#[tokio::test]
async fn patch_for_unknown_article_is_ignored() {
    let transport = ScriptedTransport::new(vec![]);
    let controller = controller(fast_config(3, 10), transport);

    let patched = controller
        .apply_patch(ArticlePatch {
            id: ArticleId::from("ghost"),
            field: PatchField::Summary("late summary".to_string()),
        })
        .await;
    assert!(!patched);
}

// --- progress monotonicity through the controller ---

#[tokio::test]
async fn progress_regression_from_upstream_is_clamped() {
    let transport = ScriptedTransport::new(vec![ScriptedAttempt::Stream {
        items: vec![
            Ok(StreamMessage::Progress {
                completed: 3,
                total: 5,
                message: None,
            }),
            Ok(StreamMessage::Progress {
                completed: 1,
                total: 5,
                message: None,
            }),
            Ok(done(5, 0, 0)),
        ],
        then_hang: false,
    }]);
    let sink = CollectingSink::new();
    let controller = controller(fast_config(3, 10), transport);

    controller
        .start(IngestOptions::default(), sink.clone())
        .await;
    wait_for(&controller, Duration::from_secs(2), |s| {
        s.lifecycle == LifecycleState::Complete
    })
    .await;

    let observed: Vec<u32> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SinkEvent::Progress(p) => Some(p.completed),
            _ => None,
        })
        .collect();
    assert_eq!(observed, vec![3, 3], "regression clamped to previous value");
}
