//! Executor state shared by [`Runtime`](super::Runtime) and its handles.
//!
//! Everything here lives on one thread. Task futures are stored type-erased
//! and moved out of the table while they are polled, so a task may spawn,
//! schedule callbacks, or wake other tasks without re-borrowing the table.

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::config::{ClockMode, RuntimeConfig};
use crate::runtime::timer::{TimerCallback, TimerHeap};
use crate::runtime::waker::{ReadyQueue, TaskWaker};
use crate::tracing_compat::{debug, trace};
use crate::types::{TaskId, Time};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Identifier reserved for the future passed to `block_on`.
pub(crate) const ROOT_TASK: TaskId = TaskId::from_raw(0);

/// Source of the current time.
#[derive(Debug)]
enum Clock {
    Virtual(Cell<Time>),
    Wall(Instant),
}

impl Clock {
    fn new(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Virtual => Self::Virtual(Cell::new(Time::ZERO)),
            ClockMode::Wall => Self::Wall(Instant::now()),
        }
    }

    fn now(&self) -> Time {
        match self {
            Self::Virtual(now) => now.get(),
            Self::Wall(origin) => {
                Time::from_nanos(u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
        }
    }

    fn advance_to(&self, deadline: Time) {
        match self {
            Self::Virtual(now) => {
                if deadline > now.get() {
                    now.set(deadline);
                }
            }
            Self::Wall(_) => {
                let wait = deadline.duration_since(self.now());
                if wait > Duration::ZERO {
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

struct TaskSlot {
    /// `None` while the task is being polled.
    future: Option<LocalFuture>,
    waker: Arc<TaskWaker>,
}

pub(crate) struct RuntimeState {
    config: RuntimeConfig,
    clock: Clock,
    tasks: RefCell<HashMap<TaskId, TaskSlot>>,
    ready: Arc<ReadyQueue>,
    timers: RefCell<TimerHeap>,
    next_task: Cell<u64>,
    steps: Cell<u64>,
    driving: Cell<bool>,
}

impl RuntimeState {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        Self {
            clock: Clock::new(config.clock),
            config,
            tasks: RefCell::new(HashMap::new()),
            ready: Arc::new(ReadyQueue::new()),
            timers: RefCell::new(TimerHeap::new()),
            next_task: Cell::new(1),
            steps: Cell::new(0),
            driving: Cell::new(false),
        }
    }

    pub(crate) const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> Time {
        self.clock.now()
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps.get()
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub(crate) fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    pub(crate) fn ready_queue(&self) -> &Arc<ReadyQueue> {
        &self.ready
    }

    pub(crate) fn allocate_task_id(&self) -> TaskId {
        let raw = self.next_task.get();
        self.next_task.set(raw + 1);
        TaskId::from_raw(raw)
    }

    /// Stores a task and makes it ready for its first poll.
    pub(crate) fn insert_task(&self, id: TaskId, future: LocalFuture) {
        let waker = TaskWaker::new(&self.ready, id);
        self.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future: Some(future),
                waker: Arc::clone(&waker),
            },
        );
        trace!(task_id = %id, "task spawned");
        waker.schedule();
    }

    /// Arms `callback` to run `delay` after the current time.
    pub(crate) fn schedule_later(&self, delay: Duration, callback: TimerCallback) {
        let deadline = self.now() + delay;
        let seq = self.timers.borrow_mut().insert(deadline, callback);
        trace!(seq, deadline = %deadline, "callback scheduled");
    }

    pub(crate) fn pop_ready(&self) -> Option<TaskId> {
        self.ready.pop()
    }

    /// Polls a spawned task once. Returns false if the task no longer exists.
    pub(crate) fn poll_task(&self, id: TaskId) -> bool {
        let (mut future, waker) = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(&id) else {
                return false;
            };
            let Some(future) = slot.future.take() else {
                return false;
            };
            (future, Arc::clone(&slot.waker))
        };

        waker.clear();
        self.count_step();
        let std_waker = waker.waker();
        let mut cx = Context::from_waker(&std_waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.tasks.borrow_mut().remove(&id);
                trace!(task_id = %id, "task completed");
            }
            Poll::Pending => {
                if let Some(slot) = self.tasks.borrow_mut().get_mut(&id) {
                    slot.future = Some(future);
                }
            }
        }
        true
    }

    pub(crate) fn count_step(&self) {
        self.steps.set(self.steps.get() + 1);
    }

    /// Fails once `max_steps` steps were taken since `start`.
    pub(crate) fn check_step_limit(&self, start: u64) -> Result<()> {
        let taken = self.steps.get() - start;
        if self.config.step_limit_reached(taken) {
            debug!(steps = taken, "step limit reached");
            return Err(Error::new(ErrorKind::StepLimit)
                .with_message(format!("step limit of {} reached", self.config.max_steps)));
        }
        Ok(())
    }

    /// Runs the callbacks due at the current time, in scheduling order.
    ///
    /// Callbacks armed by this batch run on a later tick.
    pub(crate) fn run_due_timers(&self, start: u64) -> Result<usize> {
        let now = self.now();
        let limit = self.timers.borrow().next_seq();
        let mut ran = 0;
        loop {
            self.check_step_limit(start)?;
            let next = self.timers.borrow_mut().pop_due(now, limit);
            let Some(callback) = next else {
                break;
            };
            self.count_step();
            callback();
            ran += 1;
        }
        Ok(ran)
    }

    /// Moves the clock to the next armed deadline. Returns false if no timer is armed.
    pub(crate) fn advance_clock(&self) -> bool {
        let next = self.timers.borrow().peek_deadline();
        match next {
            Some(deadline) => {
                trace!(from = %self.now(), to = %deadline, "advancing clock");
                self.clock.advance_to(deadline);
                true
            }
            None => false,
        }
    }

    pub(crate) fn deadlock(&self) -> Error {
        let blocked = self.task_count();
        debug!(blocked, "no task is ready and no timer is armed");
        Error::new(ErrorKind::Deadlock).with_message(format!(
            "no task is ready and no timer is armed ({blocked} task(s) blocked)"
        ))
    }

    /// Marks the executor as driven; nested drives are rejected.
    pub(crate) fn enter(&self) -> Result<DriveGuard<'_>> {
        if self.driving.replace(true) {
            return Err(Error::internal(
                "runtime is already being driven on this thread",
            ));
        }
        Ok(DriveGuard {
            driving: &self.driving,
        })
    }

    /// Drops every task and armed callback.
    pub(crate) fn shutdown(&self) {
        let (mut dropped_tasks, mut dropped_timers) = (0, 0);
        // Dropping a task may arm callbacks (a blocked channel call returning
        // its waiter), so drain until nothing is left.
        loop {
            let tasks: Vec<TaskSlot> =
                self.tasks.borrow_mut().drain().map(|(_, slot)| slot).collect();
            let timers = self.timers.borrow_mut().drain();
            if tasks.is_empty() && timers.is_empty() {
                break;
            }
            dropped_tasks += tasks.len();
            dropped_timers += timers.len();
            drop(tasks);
            drop(timers);
        }
        if dropped_tasks + dropped_timers > 0 {
            debug!(
                tasks = dropped_tasks,
                timers = dropped_timers,
                "runtime shut down with pending work"
            );
        }
        while self.ready.pop().is_some() {}
    }
}

#[derive(Debug)]
pub(crate) struct DriveGuard<'a> {
    driving: &'a Cell<bool>,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.driving.set(false);
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("config", &self.config)
            .field("now", &self.now())
            .field("tasks", &self.tasks.try_borrow().map(|t| t.len()).ok())
            .field("ready", &self.ready.len())
            .field("timers", &self.timers.try_borrow().map(|t| t.len()).ok())
            .field("steps", &self.steps.get())
            .finish()
    }
}
