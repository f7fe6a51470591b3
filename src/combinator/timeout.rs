//! Timeout by racing an operation against a timer.
//!
//! The operation is not cancelled when the timer wins: it keeps running and
//! its eventual result is discarded, exactly like a race loser. A failure it
//! produces after the timeout is logged as orphaned.

use crate::combinator::race::RaceBranch;
use crate::deferred::{Deferred, Take};
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::Handle;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::Time;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Future returned by [`timeout`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Timeout<T> {
    deadline: Time,
    outcome: Take<T>,
}

impl<T> Timeout<T> {
    /// Returns the instant at which the timer fires.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

impl<T> Future for Timeout<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome).poll(cx)
    }
}

/// Waits for `branch`, failing with [`ErrorKind::TimedOut`] if `duration`
/// elapses first.
///
/// If the branch fails before the timer fires, its error is returned.
pub fn timeout<T, B>(handle: &Handle, duration: Duration, branch: B) -> Timeout<T>
where
    T: 'static,
    B: RaceBranch<T>,
{
    let deadline = handle.now() + duration;
    let outcome: Deferred<T> = Deferred::new();

    let sink = outcome.clone();
    branch.on_settled(Box::new(move |result| {
        if !sink.is_settled() {
            let _ = sink.settle(result);
            return;
        }
        match result {
            Ok(_) => trace!("operation finished after its timeout"),
            Err(error) => warn!(error = %error, "operation failed after its timeout"),
        }
    }));

    let timer = outcome.clone();
    handle.schedule_later(duration, move || {
        if timer.is_settled() {
            return;
        }
        debug!(deadline = %deadline, "timeout elapsed");
        let _ = timer.fail(
            Error::new(ErrorKind::TimedOut)
                .with_message(format!("operation did not finish within {duration:?}")),
        );
    });

    Timeout {
        deadline,
        outcome: outcome.take(),
    }
}
