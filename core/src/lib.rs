//! Readiness polling for dcprobe.
//!
//! # Architecture
//!
//! - [`poll`] - bounded-retry loop that drives a fallible operation until it succeeds,
//!   fails fatally, runs out of time, or is cancelled
//! - [`clock`] - time source abstraction; [`SystemClock`] in production and
//!   [`ManualClock`] for deterministic tests
//! - [`cancel`] - cooperative cancellation shared between the poller and the
//!   operation it drives
//!
//! Everything here is synchronous. Async callers run the poller inside
//! `spawn_blocking` and cancel it through a [`CancelToken`].

pub mod cancel;
pub mod clock;
pub mod poll;

pub use cancel::{CancelToken, Cancelled};
pub use clock::{Clock, ManualClock, SystemClock};
pub use poll::{
    Attempt, AttemptContext, Backoff, FailureClass, PollError, PollPolicy, Poller, Ready,
    poll_until_ready,
};
