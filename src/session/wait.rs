//! Bounded polling.
//!
//! Every wait in the engine (slew, guider settle, cover, image download) is a
//! [`wait_until`] with an explicit poll cap. Nothing loops without a bound.

use std::future::Future;
use std::time::Duration;

use super::clock::{CancelToken, Clock};

/// Poll cadence plus the failsafe counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Maximum number of predicate calls, at least one
    pub max_polls: u32,
}

impl WaitPolicy {
    /// A policy polling every `poll_interval`, clamping `max_polls` to at least one.
    pub fn new(poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            poll_interval,
            max_polls: max_polls.max(1),
        }
    }

    /// Upper bound on time spent sleeping inside one wait.
    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_polls.saturating_sub(1)
    }
}

/// How a bounded wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate returned `true`
    Completed {
        /// Predicate calls made
        polls: u32,
    },
    /// `max_polls` ran out
    TimedOut {
        /// Predicate calls made
        polls: u32,
    },
    /// The cancel token fired first
    Cancelled {
        /// Predicate calls made
        polls: u32,
    },
}

impl WaitOutcome {
    /// Predicate calls made, whatever the outcome
    pub fn polls(&self) -> u32 {
        match *self {
            WaitOutcome::Completed { polls }
            | WaitOutcome::TimedOut { polls }
            | WaitOutcome::Cancelled { polls } => polls,
        }
    }
}

/// Poll `done` until it returns `true`, at most `policy.max_polls` times.
///
/// Sleeps `poll_interval` between polls (never after the last one). A predicate
/// error ends the wait immediately and is returned to the caller.
pub async fn wait_until<F, Fut>(
    policy: &WaitPolicy,
    clock: &dyn Clock,
    cancel: &CancelToken,
    mut done: F,
) -> anyhow::Result<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    for poll in 1..=policy.max_polls {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled { polls: poll - 1 });
        }
        if done().await? {
            return Ok(WaitOutcome::Completed { polls: poll });
        }
        if poll < policy.max_polls && !sleep_cancellable(clock, cancel, policy.poll_interval).await
        {
            return Ok(WaitOutcome::Cancelled { polls: poll });
        }
    }
    Ok(WaitOutcome::TimedOut {
        polls: policy.max_polls,
    })
}

/// Sleep on `clock`, returning `false` if `cancel` fired first.
pub async fn sleep_cancellable(clock: &dyn Clock, cancel: &CancelToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = clock.sleep(duration) => true,
    }
}
