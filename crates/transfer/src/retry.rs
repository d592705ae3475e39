use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

/// Retry budget and backoff schedule for one session.
///
/// The budget is global to the session: `attempt` counts retries since the
/// session started and never resets between chunks, so a source that keeps
/// failing cannot stall the caller indefinitely.
#[derive(Clone)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
    backoff: Arc<BackoffFn>,
}

impl RetryContext {
    /// Creates a context allowing `max_attempts` retries, waiting
    /// `backoff(attempt)` before each (attempt is 1-based).
    pub fn new<F>(max_attempts: u32, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            attempt: 0,
            max_attempts,
            backoff: Arc::new(backoff),
        }
    }

    /// A context that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, |_| Duration::ZERO)
    }

    /// Retries performed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    /// Consumes one retry. Returns `false` once the budget is exceeded.
    pub(crate) fn next_attempt(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt <= self.max_attempts
    }
}

impl fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
