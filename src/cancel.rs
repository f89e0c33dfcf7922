//! Cooperative cancellation for tree walks and organize runs.
//!
//! A [`CancellationToken`] is cheap to clone and shared between the caller and
//! every worker task. Tasks poll it before doing work; nothing is ever aborted
//! mid-operation. A token may carry a deadline, in which case the first check
//! after the deadline latches it into the cancelled state and records that the
//! cancellation came from the timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct TokenState {
    cancelled: AtomicBool,
    timed_out: AtomicBool,
    deadline: Option<Instant>,
}

/// Shared cancellation flag with an optional wall-clock deadline.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a token that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if the token was cancelled or its deadline has passed.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        if self.state.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.state.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.state.timed_out.store(true, Ordering::SeqCst);
                self.state.cancelled.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Reads the latched flag without evaluating the deadline.
    pub fn was_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true if a deadline check is what cancelled this token.
    pub fn timed_out(&self) -> bool {
        self.state.timed_out.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
