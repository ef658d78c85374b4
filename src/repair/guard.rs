//! Attempt guard for repeated repair runs.
//!
//! The repository history is the only state: every automated commit carries
//! a marker token, and the guard counts markers in the most recent commit
//! messages. Once the count reaches the configured maximum, further runs
//! stop without touching the tree.

use anyhow::Result;
use tracing::debug;

use super::git::Vcs;
use crate::config::GuardConfig;

/// Result of inspecting recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GuardDecision {
    /// Markers found in the history window.
    pub attempts: usize,
    /// Configured maximum.
    pub max_attempts: usize,
}

impl GuardDecision {
    pub fn should_stop(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptGuard {
    config: GuardConfig,
}

impl AttemptGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Evaluates already-fetched commit messages.
    pub fn evaluate<S: AsRef<str>>(&self, messages: &[S]) -> GuardDecision {
        let window = messages.iter().take(self.config.history_window);
        let attempts = window
            .map(|m| count_markers(m.as_ref(), &self.config.marker))
            .sum();

        GuardDecision {
            attempts,
            max_attempts: self.config.max_attempts,
        }
    }

    /// Reads the history window from the repository and evaluates it.
    pub async fn check(&self, vcs: &dyn Vcs) -> Result<GuardDecision> {
        let messages = vcs
            .recent_commit_messages(self.config.history_window)
            .await?;
        let decision = self.evaluate(&messages);
        debug!(
            "Found {} automated-fix marker(s) in last {} commit(s), limit {}",
            decision.attempts,
            messages.len(),
            decision.max_attempts
        );
        Ok(decision)
    }

    pub async fn should_stop(&self, vcs: &dyn Vcs) -> Result<bool> {
        Ok(self.check(vcs).await?.should_stop())
    }
}

/// Number of non-overlapping occurrences of `marker` in `text`.
pub(crate) fn count_markers(text: &str, marker: &str) -> usize {
    if marker.is_empty() {
        return 0;
    }
    text.matches(marker).count()
}
