//! Sleep future for delaying execution.
//!
//! A [`Sleep`] arms one runtime callback at creation. The callback resolves a
//! [`Deferred`] that the future waits on, so a sleep costs no polling while
//! it is pending.

use crate::deferred::{Deferred, Take};
use crate::runtime::Handle;
use crate::types::Time;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A future that completes after a specified duration.
///
/// The timer starts when the `Sleep` is created, not when it is first
/// polled. Dropping it leaves the armed callback in place; it fires into a
/// deferred nobody waits on.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Time,
    fired: Take<()>,
}

impl Sleep {
    pub(crate) fn new(handle: &Handle, duration: Duration) -> Self {
        let deadline = handle.now() + duration;
        let fired = handle.timer(duration, ());
        Self {
            deadline,
            fired: fired.take(),
        }
    }

    /// Returns the deadline of this sleep.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }

    /// Returns true once the timer has fired.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.fired.deferred().is_settled()
    }

    /// Returns the deferred resolved when the timer fires.
    #[must_use]
    pub fn deferred(&self) -> Deferred<()> {
        self.fired.deferred().clone()
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // The timer deferred is never failed, so any outcome means elapsed.
        Pin::new(&mut self.fired).poll(cx).map(|_| ())
    }
}

/// Sleeps for `duration` on the runtime behind `handle`.
pub fn sleep(handle: &Handle, duration: Duration) -> Sleep {
    handle.sleep(duration)
}
