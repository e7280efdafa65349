//! Suggestion request tokens
//!
//! Suggestion fetches cannot be cancelled. Each request gets a
//! monotonically increasing token; only the answer carrying the latest
//! token is applied, answers to superseded requests are discarded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuggestionToken(pub u64);

#[derive(Debug, Clone, Default)]
pub struct SuggestionTracker {
    issued: u64,
    latest: Option<SuggestionToken>,
}

impl SuggestionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request; supersedes any request still in flight
    pub fn begin(&mut self) -> SuggestionToken {
        self.issued += 1;
        let token = SuggestionToken(self.issued);
        self.latest = Some(token);
        token
    }

    /// Whether the answer for `token` should be applied
    ///
    /// Completing the latest request ends the awaiting state.
    pub fn complete(&mut self, token: SuggestionToken) -> bool {
        if self.latest == Some(token) {
            self.latest = None;
            true
        } else {
            tracing::debug!(token = token.0, "Stale suggestion answer discarded");
            false
        }
    }

    pub fn is_awaiting(&self) -> bool {
        self.latest.is_some()
    }
}
