//! Cancellation, wall-clock budget, and recursion-depth limits.
//!
//! The evaluator is single-threaded; the only points at which it may block
//! are module resolution, resource reads, and external-reader RPC waits.
//! Those are also the points where cancellation and timeout are observed,
//! so `check_suspension_point` is called exactly there (plus once per
//! property evaluation, which bounds latency for pure-compute programs).

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::errors::{ErrorKind, EvalError, EvalResult};

/// Default maximum interpreter recursion depth.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 512;

/// Shared flag the embedding caller flips to request cancellation.
///
/// Cloning shares the flag. The evaluator observes it at suspension points
/// and raises `Cancelled`; partial results are discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-evaluator execution limits.
#[derive(Debug, Clone)]
pub struct Limits {
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
    budget: Option<Duration>,
    pub max_recursion_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cancel: None,
            deadline: None,
            budget: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

impl Limits {
    /// Limits that never trip. The checks compile down to two branch tests.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets a total wall-clock budget, measured from this call.
    #[must_use]
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self.budget = Some(budget);
        self
    }

    /// Overrides the maximum recursion depth.
    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Observes cancellation and timeout. Called at suspension points.
    pub(crate) fn check_suspension_point(&self) -> EvalResult<()> {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Err(EvalError::keyed(ErrorKind::Cancelled, "cancelled", &[]));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                let secs = self.budget.unwrap_or_default().as_secs();
                return Err(EvalError::keyed(ErrorKind::TimedOut, "timedOut", &[&secs]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_trips() {
        let token = CancelToken::new();
        let limits = Limits::none().with_cancel_token(token.clone());
        assert!(limits.check_suspension_point().is_ok());
        token.cancel();
        let err = limits.check_suspension_point().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn zero_budget_times_out() {
        let limits = Limits::none().with_timeout(Duration::ZERO);
        let err = limits.check_suspension_point().unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimedOut);
    }
}
