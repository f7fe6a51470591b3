//! JoinHandle for awaiting spawned task results.
//!
//! `JoinHandle<T>` is returned by spawn operations and allows the spawner
//! to await the task's result. The handle does not own the task: dropping
//! it leaves the task running, and the result is simply discarded.
//!
//! # Example
//!
//! ```ignore
//! let handle = runtime.spawn(async { 42 });
//! let result = runtime.block_on(handle)??;
//! assert_eq!(result, 42);
//! ```

use crate::deferred::{Deferred, Take};
use crate::error::Result;
use crate::types::TaskId;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A handle to a spawned task that can be used to await its result.
///
/// Awaiting the handle yields `Ok(value)` when the task finished, or the
/// error a fallible task failed with (see
/// [`Handle::spawn_fallible`](super::Handle::spawn_fallible)).
#[derive(Debug)]
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    task_id: TaskId,
    result: Take<T>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(task_id: TaskId, result: Deferred<T>) -> Self {
        Self {
            task_id,
            result: result.take(),
        }
    }

    /// Returns the task ID of the spawned task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns true once the task has produced its result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.result.deferred().is_settled()
    }

    /// Returns the deferred that receives the task's result.
    #[must_use]
    pub fn deferred(&self) -> &Deferred<T> {
        self.result.deferred()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx)
    }
}
