//! Debounced job scheduling with stale-result detection.
//!
//! [`Debouncer::trigger`] restarts a quiet-period timer. When the timer
//! fires, the job runs in its own task with a [`Ticket`]. Every trigger or
//! cancel bumps a generation counter; a job checks [`Ticket::is_current`]
//! before applying its result, so work superseded while in flight is ignored
//! rather than aborted.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

/// Identifies one scheduled run.
#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl Ticket {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether nothing has been triggered or cancelled since this ticket was issued.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.generation
    }
}

/// Collapses bursts of triggers into one run after a quiet period.
///
/// Dropping the debouncer cancels any pending timer and invalidates
/// outstanding tickets.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
    timer: Mutex<Option<AbortHandle>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            timer: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `job` to run after the quiet period, replacing any pending one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger<F, Fut>(&self, job: F) -> Ticket
    where
        F: FnOnce(Ticket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);

        // Bump and re-arm under the lock so two triggers can't leave the
        // older timer armed with the newer generation.
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let ticket = Ticket {
            generation,
            latest: Arc::clone(&self.generation),
        };

        let delay = self.delay;
        let scheduled = ticket.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if scheduled.is_current() {
                trace!(generation = scheduled.generation, "Debounce elapsed");
                tokio::spawn(job(scheduled));
            }
        });

        if let Some(previous) = timer.replace(handle.abort_handle()) {
            previous.abort();
        }
        ticket
    }

    /// Drop the pending timer and invalidate every outstanding ticket.
    pub fn cancel(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
