//! Waker implementation with deduplication.
//!
//! Wakers only push task identifiers onto the ready queue; all task state
//! stays on the executor thread. A task is enqueued at most once between two
//! polls no matter how often it is woken.
//!
//! Note: This implementation uses safe Rust only (no unsafe).

use crate::types::TaskId;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

/// FIFO of tasks ready to be polled.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    queue: SegQueue<TaskId>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pop(&self) -> Option<TaskId> {
        self.queue.pop()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    fn push(&self, task: TaskId) {
        self.queue.push(task);
    }
}

/// A waker for a specific task.
#[derive(Debug)]
pub(crate) struct TaskWaker {
    ready: Arc<ReadyQueue>,
    task: TaskId,
    scheduled: AtomicBool,
}

impl TaskWaker {
    pub(crate) fn new(ready: &Arc<ReadyQueue>, task: TaskId) -> Arc<Self> {
        Arc::new(Self {
            ready: Arc::clone(ready),
            task,
            scheduled: AtomicBool::new(false),
        })
    }

    /// Creates a [`Waker`] backed by this task waker.
    pub(crate) fn waker(self: &Arc<Self>) -> Waker {
        Waker::from(Arc::clone(self))
    }

    /// Enqueues the task unless it is already waiting to be polled.
    pub(crate) fn schedule(&self) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.ready.push(self.task);
        }
    }

    /// Marks the task as dequeued; the next wake enqueues it again.
    pub(crate) fn clear(&self) {
        self.scheduled.store(false, Ordering::Release);
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
