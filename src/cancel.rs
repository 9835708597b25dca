//! Per-session cancellation coordination
//!
//! One cancellation token per logical session. Triggering the token
//! synchronously marks the session cancelled; the routing loop re-tests it
//! at every boundary (before admitting a batch, before applying progress,
//! and immediately before a delayed retry restart fires), so no further
//! state mutation happens after the trigger is observed.

use tokio_util::sync::CancellationToken;

/// Issues and owns the cancellation token for the current session
///
/// A fresh token is issued on every `start()`; triggering an old session's
/// token can never affect a newer session.
#[derive(Debug)]
pub struct CancelCoordinator {
    current: CancellationToken,
}

impl CancelCoordinator {
    /// Create a coordinator with an initial (untriggered) token
    pub fn new() -> Self {
        Self {
            current: CancellationToken::new(),
        }
    }

    /// Issue a fresh token for a new session, replacing the previous one
    pub fn issue(&mut self) -> CancellationToken {
        self.current = CancellationToken::new();
        self.current.clone()
    }

    /// Trigger the current session's token
    pub fn cancel(&self) {
        self.current.cancel();
    }

    /// Whether the current session's token has been triggered
    pub fn is_cancelled(&self) -> bool {
        self.current.is_cancelled()
    }

    /// Handle to the current token (for passing into async continuations)
    pub fn token(&self) -> CancellationToken {
        self.current.clone()
    }
}

impl Default for CancelCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
