//! Bounded-retry readiness polling.
//!
//! Drives an operation that is expected to fail while a remote resource is still
//! coming up (an SSH daemon that is not accepting connections yet, for example)
//! until it succeeds or a wall-clock budget runs out.
//!
//! # Policy
//!
//! - Every failure is classified by the caller as [`FailureClass::Transient`]
//!   (retry) or [`FailureClass::Fatal`] (stop now).
//! - A fatal failure is returned immediately; no further attempts are made.
//! - After a transient failure, if `elapsed >= total_timeout` the poll ends with
//!   [`PollError::DeadlineExceeded`] carrying the last cause.
//! - Between attempts the poller sleeps according to [`Backoff`], clamped to the
//!   remaining budget. The default is no sleep: the per-attempt timeout handed to
//!   the operation paces the loop.
//! - A zero total timeout performs no attempts and fails with
//!   [`PollError::DeadlineExceeded`].
//!
//! Worst-case blocking time is `total_timeout` plus one per-attempt timeout.
//!
//! # Example
//!
//! ```ignore
//! let policy = PollPolicy::new(Duration::from_secs(1800), Duration::from_secs(60));
//! let session = Poller::new(policy)
//!     .with_cancel(token.clone())
//!     .run("ssh_connect", RemoteError::failure_class, |ctx| connector.connect(&target, ctx, &token))?;
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{CancelToken, Clock, SystemClock};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Expected to clear up with time; try again.
    Transient,
    /// Will not clear up with retries; give up immediately.
    Fatal,
}

/// Outcome of a single attempt after classification.
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<T, E> {
    Success(T),
    Transient(E),
    Fatal(E),
}

impl<T, E> Attempt<T, E> {
    pub fn classify<K>(result: Result<T, E>, classify: K) -> Self
    where
        K: Fn(&E) -> FailureClass,
    {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => match classify(&err) {
                FailureClass::Transient => Self::Transient(err),
                FailureClass::Fatal => Self::Fatal(err),
            },
        }
    }
}

/// Delay inserted between a transient failure and the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    Fixed(Duration),
    /// `initial * multiplier^n` before retry `n` (0-based), capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: u32,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (0 before the second attempt).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => initial
                .saturating_mul(multiplier.saturating_pow(retry))
                .min(max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Budget for the whole poll, measured from the first attempt.
    pub total_timeout: Duration,
    /// Handed to the operation; the poller does not enforce it.
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl PollPolicy {
    #[must_use]
    pub fn new(total_timeout: Duration, attempt_timeout: Duration) -> Self {
        Self {
            total_timeout,
            attempt_timeout,
            backoff: Backoff::None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What the operation knows about the attempt it is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub timeout: Duration,
    /// Time spent in the poll before this attempt started.
    pub elapsed: Duration,
}

/// A successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PollError<E: fmt::Display> {
    /// Only transient failures were seen and the budget ran out.
    #[error(
        "not ready after {}s ({attempts} attempts){}",
        .elapsed.as_secs(),
        cause_suffix(.last_cause)
    )]
    DeadlineExceeded {
        elapsed: Duration,
        attempts: u32,
        #[source]
        last_cause: Option<E>,
    },
    /// The operation failed with a non-retryable error.
    #[error("attempt {attempt} failed permanently: {source}")]
    Fatal { attempt: u32, source: E },
    /// The caller cancelled the poll, before an attempt or while one was
    /// running.
    #[error(
        "cancelled after {}s ({attempts} attempts){}",
        .elapsed.as_secs(),
        cause_suffix(.last_cause)
    )]
    Cancelled {
        elapsed: Duration,
        attempts: u32,
        #[source]
        last_cause: Option<E>,
    },
}

fn cause_suffix<E: fmt::Display>(cause: &Option<E>) -> String {
    cause
        .as_ref()
        .map_or_else(String::new, |cause| format!(": {cause}"))
}

impl<E: fmt::Display> PollError<E> {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::DeadlineExceeded { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
            Self::Fatal { attempt, .. } => *attempt,
        }
    }

    /// The underlying operation error, if any attempt produced one.
    #[must_use]
    pub fn into_cause(self) -> Option<E> {
        match self {
            Self::DeadlineExceeded { last_cause, .. } | Self::Cancelled { last_cause, .. } => {
                last_cause
            }
            Self::Fatal { source, .. } => Some(source),
        }
    }

    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Bounded-retry poller. Holds no state between runs and is cheap to clone.
#[derive(Debug, Clone)]
pub struct Poller<C = SystemClock> {
    policy: PollPolicy,
    clock: C,
    cancel: CancelToken,
}

impl Poller<SystemClock> {
    #[must_use]
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            clock: SystemClock::new(),
            cancel: CancelToken::new(),
        }
    }
}

impl<C: Clock> Poller<C> {
    #[must_use]
    pub fn with_clock<D: Clock>(self, clock: D) -> Poller<D> {
        Poller {
            policy: self.policy,
            clock,
            cancel: self.cancel,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally, the budget is spent, or
    /// the poll is cancelled.
    ///
    /// `operation_name` only labels log output.
    pub fn run<T, E, F, K>(
        &self,
        operation_name: &str,
        classify: K,
        mut operation: F,
    ) -> Result<Ready<T>, PollError<E>>
    where
        F: FnMut(&AttemptContext) -> Result<T, E>,
        K: Fn(&E) -> FailureClass,
        E: fmt::Display,
    {
        let total = self.policy.total_timeout;
        let start = self.clock.now();
        let since_start = || self.clock.now().saturating_sub(start);

        if total.is_zero() {
            warn!(
                operation = %operation_name,
                "Zero poll budget; not attempting"
            );
            return Err(PollError::DeadlineExceeded {
                elapsed: Duration::ZERO,
                attempts: 0,
                last_cause: None,
            });
        }

        let mut attempts = 0u32;
        let mut last_cause: Option<E> = None;

        loop {
            if self.cancel.is_cancelled() {
                let elapsed = since_start();
                warn!(
                    operation = %operation_name,
                    attempts,
                    elapsed_ms = elapsed.as_millis(),
                    "Poll cancelled"
                );
                return Err(PollError::Cancelled {
                    elapsed,
                    attempts,
                    last_cause,
                });
            }

            attempts += 1;
            let ctx = AttemptContext {
                attempt: attempts,
                timeout: self.policy.attempt_timeout,
                elapsed: since_start(),
            };

            let outcome = Attempt::classify(operation(&ctx), &classify);

            // A cancel that lands mid-attempt usually surfaces as the
            // operation's own error; report the cancel instead.
            if !matches!(outcome, Attempt::Success(_)) && self.cancel.is_cancelled() {
                if let Attempt::Transient(cause) = outcome {
                    last_cause = Some(cause);
                }
                let elapsed = since_start();
                warn!(
                    operation = %operation_name,
                    attempts,
                    elapsed_ms = elapsed.as_millis(),
                    "Poll cancelled during attempt"
                );
                return Err(PollError::Cancelled {
                    elapsed,
                    attempts,
                    last_cause,
                });
            }

            match outcome {
                Attempt::Success(value) => {
                    let elapsed = since_start();
                    debug!(
                        operation = %operation_name,
                        attempts,
                        elapsed_ms = elapsed.as_millis(),
                        "Operation ready"
                    );
                    return Ok(Ready {
                        value,
                        attempts,
                        elapsed,
                    });
                }
                Attempt::Fatal(source) => {
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %source,
                        "Operation failed with non-retryable error"
                    );
                    return Err(PollError::Fatal {
                        attempt: attempts,
                        source,
                    });
                }
                Attempt::Transient(cause) => {
                    let elapsed = since_start();
                    if elapsed >= total {
                        warn!(
                            operation = %operation_name,
                            attempts,
                            elapsed_ms = elapsed.as_millis(),
                            error = %cause,
                            "Operation not ready before deadline"
                        );
                        return Err(PollError::DeadlineExceeded {
                            elapsed,
                            attempts,
                            last_cause: Some(cause),
                        });
                    }

                    let delay = self.policy.backoff.delay(attempts - 1).min(total - elapsed);
                    debug!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %cause,
                        delay_ms = delay.as_millis(),
                        remaining_ms = (total - elapsed).as_millis(),
                        "Operation not ready, retrying"
                    );
                    last_cause = Some(cause);

                    if !delay.is_zero() {
                        self.clock.sleep(delay, &self.cancel);
                    }
                }
            }
        }
    }
}

/// Poll `operation` on the system clock with no backoff and no external cancellation.
pub fn poll_until_ready<T, E, F, K>(
    operation: F,
    total_timeout: Duration,
    attempt_timeout: Duration,
    classify: K,
) -> Result<Ready<T>, PollError<E>>
where
    F: FnMut(&AttemptContext) -> Result<T, E>,
    K: Fn(&E) -> FailureClass,
    E: fmt::Display,
{
    Poller::new(PollPolicy::new(total_timeout, attempt_timeout)).run(
        "poll_until_ready",
        classify,
        operation,
    )
}
