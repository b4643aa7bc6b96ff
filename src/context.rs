use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{DeployError, DeployResult};

/// Cancellation and deadline scope for executor calls.
///
/// A `Context` is cheap to clone and share; cancelling any clone
/// cancels them all. Executors check it before starting a command
/// and while waiting on one, and the engine polls it only between
/// swap steps, never in the middle of a runtime command.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gantry::Context;
///
/// let ctx = Context::new().with_timeout(Duration::from_secs(300));
/// assert!(!ctx.is_done());
/// ctx.cancel();
/// assert!(ctx.is_done());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Derive a context that additionally expires after `timeout`.
    ///
    /// The returned context shares the cancellation flag with
    /// `self`, so cancelling the parent cancels the child.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error out if the context is cancelled or past its deadline.
    pub fn check(&self) -> DeployResult<()> {
        if self.is_done() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        let ctx = Context::new();

        assert!(!ctx.is_done());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let ctx = Context::new();
        let child = ctx.clone();

        ctx.cancel();

        assert!(child.is_done());
        assert!(matches!(child.check(), Err(DeployError::Cancelled)));
    }

    #[test]
    fn deadline_expires() {
        let ctx = Context::new().with_timeout(Duration::ZERO);

        assert!(ctx.is_done());
    }

    #[test]
    fn child_timeout_shares_parent_cancellation() {
        let parent = Context::new();
        let child = parent.with_timeout(Duration::from_secs(600));

        assert!(!child.is_done());
        parent.cancel();
        assert!(child.is_done());
    }
}
