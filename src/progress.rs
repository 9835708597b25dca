//! Monotone progress tracking
//!
//! Owns the (completed, total) counters and the human-readable status line
//! derived from upstream progress notifications. `completed` never decreases
//! within a session; an out-of-order regression from upstream is clamped to
//! the previous value and logged as a data-quality warning, not a crash.

use crate::types::ProgressState;

/// Session-scoped progress counters with clamp-on-regression
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl ProgressTracker {
    /// Create a tracker at zero progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an upstream progress notification, returning the new state
    ///
    /// Messages are processed in arrival order with no concurrent writer, so
    /// the clamp rule alone is sufficient to keep `completed` monotone.
    pub fn apply(&mut self, completed: u32, total: u32, message: Option<String>) -> ProgressState {
        let clamped = if completed < self.state.completed {
            tracing::warn!(
                reported = completed,
                previous = self.state.completed,
                "upstream progress regression, clamping to previous value"
            );
            self.state.completed
        } else {
            completed
        };

        self.state.completed = clamped;
        self.state.total = total.max(self.state.total);
        self.state.message = message.unwrap_or_else(|| {
            format!(
                "{}/{} sources processed",
                self.state.completed, self.state.total
            )
        });

        self.state.clone()
    }

    /// Current progress state
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Reset to zero progress (new session or retry attempt)
    pub fn reset(&mut self) {
        self.state = ProgressState::default();
    }
}
