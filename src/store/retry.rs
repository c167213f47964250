//! Bounded reconnection backoff
//!
//! A fixed schedule of delays rather than a multiplier: attempt `n` waits
//! `delays[n - 1]`, and attempts past the end of the list reuse the last
//! entry.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Retry budget and delay schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    /// Delay before each attempt, in order
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Delay for a given attempt number (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

/// What [`RetryScheduler::schedule`] decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A timer is running; `attempt` is passed to the callback when it fires
    Scheduled { attempt: u32, delay: Duration },
    /// Budget spent; nothing was scheduled
    Exhausted { attempts: u32 },
    /// No Tokio runtime to run the timer on; the attempt was not counted
    NoRuntime,
}

/// One-shot backoff timer with an attempt counter
///
/// Timers run on the ambient Tokio runtime. Without one, scheduling reports
/// [`RetryOutcome::NoRuntime`] instead of spawning.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            timer: None,
        }
    }

    /// Start the next attempt's timer, or report exhaustion
    pub fn schedule<F>(&mut self, on_retry: F) -> RetryOutcome
    where
        F: FnOnce(u32) + Send + 'static,
    {
        if self.attempts >= self.policy.max_attempts {
            return RetryOutcome::Exhausted {
                attempts: self.attempts,
            };
        }

        let Ok(runtime) = Handle::try_current() else {
            return RetryOutcome::NoRuntime;
        };

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = self.policy.delay_for_attempt(attempt);

        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        self.timer = Some(runtime.spawn(async move {
            sleep(delay).await;
            on_retry(attempt);
        }));

        RetryOutcome::Scheduled { attempt, delay }
    }

    /// Cancel any pending timer and forget past attempts
    pub fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a timer is still waiting to fire
    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
