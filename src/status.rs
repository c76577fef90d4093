//! Latest known streaming state.
//!
//! Written only by the session read loop (status responses and stream
//! state events), read by the supervisor. A state that has never been
//! written reports `active = false` and `last_updated = None`.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Snapshot of the streaming flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingState {
    /// Whether the stream output is active
    pub active: bool,
    /// When the flag was last written, `None` if never
    pub last_updated: Option<DateTime<Utc>>,
}

impl StreamingState {
    /// Whether the flag has been written since the last clear
    pub fn is_known(&self) -> bool {
        self.last_updated.is_some()
    }
}

/// Thread-safe streaming state cell
#[derive(Debug, Default)]
pub struct StatusTracker {
    state: RwLock<StreamingState>,
}

impl StatusTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest flag
    pub fn set(&self, active: bool) {
        if let Ok(mut state) = self.state.write() {
            *state = StreamingState {
                active,
                last_updated: Some(Utc::now()),
            };
        }
    }

    /// Forget the flag (controlled application gone or session dropped)
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = StreamingState::default();
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> StreamingState {
        self.state.read().map(|s| *s).unwrap_or_default()
    }

    /// True only for a known, active stream
    pub fn is_active(&self) -> bool {
        let state = self.snapshot();
        state.is_known() && state.active
    }
}
