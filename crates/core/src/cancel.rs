//! Cooperative cancellation for a single run.
//!
//! A `StopToken` is created per run and handed to whoever may need to cancel
//! (a ctrl-c handler, an HTTP request guard). The agent loop checks it at the
//! top of every step; in-flight network calls are aborted separately by the
//! transport's own cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, clonable stop signal scoped to one run.
///
/// Replaces process-wide stop flags: two concurrent runs each get their own
/// token, so cancelling one never interferes with the other.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop at its next check point.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_stopped() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
    }

    #[test]
    fn stop_is_visible_through_clones() {
        let token = StopToken::new();
        let handle = token.clone();
        handle.stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn tokens_are_independent() {
        let a = StopToken::new();
        let b = StopToken::new();
        a.stop();
        assert!(a.is_stopped());
        assert!(!b.is_stopped());
    }
}
