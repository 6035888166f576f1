//! Bounded retry with exponential backoff.
//!
//! Remote hosts come up slowly and SSH connections fail transiently while
//! they boot, so most remote operations are wrapped in [`retry_for`]. The
//! helper keeps retrying until the operation succeeds or the total time
//! budget is spent, at which point the last failure is returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Delay sequence used between attempts of [`retry_for`].
///
/// The first delay is `max(1ms, budget / 64)`; each following delay doubles
/// the previous one. Every delay is capped at `budget / 4`, so the sequence
/// is non-decreasing and never exceeds a quarter of the budget.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackoffSchedule {
    next: Duration,
    cap: Duration,
}

impl BackoffSchedule {
    /// Builds the schedule for a total retry budget.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        let cap = budget / 4;
        let initial = (budget / 64).max(MIN_DELAY).min(cap);
        Self { next: initial, cap }
    }

    /// Upper bound applied to every delay.
    #[must_use]
    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Returns the current delay and advances the schedule.
    pub fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.cap);
        current
    }
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.advance())
    }
}

/// Runs `operation` until it succeeds or `budget` has elapsed.
///
/// Success returns immediately without sleeping. After a failure the elapsed
/// time since the call began is compared against `budget`; once it is
/// exceeded the last error is returned verbatim. A zero budget therefore
/// permits exactly one attempt.
///
/// # Errors
///
/// Returns the final error produced by `operation` when the budget runs out.
pub async fn retry_for<T, E, F, Fut>(budget: Duration, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut schedule = BackoffSchedule::new(budget);
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let elapsed = started.elapsed();
        if budget.is_zero() || elapsed > budget {
            warn!(
                attempt,
                budget_ms = budget.as_millis(),
                error = %err,
                "retry budget exhausted"
            );
            return Err(err);
        }

        let delay = schedule.advance();
        debug!(
            attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "operation failed; retrying"
        );
        sleep(delay).await;
    }
}
