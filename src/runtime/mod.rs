//! Single-threaded cooperative executor.
//!
//! This module contains the scheduling machinery the primitives are built on:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Move-based runtime builder
//! - [`env_config`]: `COOPSYNC_*` environment variables and TOML files
//! - [`task_handle`]: JoinHandle for awaiting spawned task results
//! - `state`: task table, ready queue, timer heap and clock
//! - `waker`: Waker implementation with deduplication
//! - `timer`: Timer heap for deferred callbacks
//!
//! # Scheduling
//!
//! One executor tick does exactly one of:
//!
//! 1. poll the next ready task (wake order, FIFO);
//! 2. when no task is ready, run every callback due at the current time, in
//!    scheduling order;
//! 3. when nothing is due, advance the clock to the next deadline.
//!
//! A callback armed with [`Handle::schedule_later`] and `Duration::ZERO`
//! therefore runs after its caller has returned to the scheduler, never
//! synchronously.
//!
//! ## Quick Start
//!
//! ```ignore
//! use coopsync::runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! let handle = runtime.handle();
//! let chan = handle.channel::<u32>(1);
//! let value = runtime.block_on(async move {
//!     chan.send(7).await?;
//!     chan.receive().await
//! })??;
//! assert_eq!(value, 7);
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use coopsync::runtime::RuntimeBuilder;
//!
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::new()
//!     .config_file("config/coopsync.toml")
//!     .with_env_overrides()
//!     .build()?;
//! ```
//!
//! # Error Handling
//!
//! `block_on` reports [`ErrorKind::Deadlock`](crate::error::ErrorKind::Deadlock)
//! when the root future is pending, no task is ready and no timer is armed,
//! and [`ErrorKind::StepLimit`](crate::error::ErrorKind::StepLimit) when the
//! configured step budget runs out.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod state;
pub mod task_handle;
pub(crate) mod timer;
pub(crate) mod waker;

pub use builder::RuntimeBuilder;
pub use config::{ClockMode, ConfigError, RuntimeConfig};
pub use task_handle::JoinHandle;

use crate::channel::{Channel, WaiterPolicy};
use crate::deferred::Deferred;
use crate::error::Result;
use crate::time::Sleep;
use crate::tracing_compat::debug;
use crate::types::Time;
use state::{RuntimeState, ROOT_TASK};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;
use waker::TaskWaker;

/// A single-threaded executor.
///
/// The runtime owns every spawned task. Dropping it drops all pending tasks
/// and armed callbacks, even if [`Handle`]s are still alive.
pub struct Runtime {
    state: Rc<RuntimeState>,
}

impl Runtime {
    /// Creates a runtime with the default configuration (virtual clock).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a runtime with an explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            state: Rc::new(RuntimeState::new(config)),
        }
    }

    /// Creates a runtime configured from `COOPSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        RuntimeBuilder::new().with_env_overrides().build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Returns a handle for spawning tasks and scheduling callbacks.
    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            state: Rc::clone(&self.state),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        self.state.config()
    }

    /// Spawns a task. See [`Handle::spawn`].
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.handle().spawn(future)
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.state.now()
    }

    /// Returns the number of steps executed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.state.steps()
    }

    /// Returns the number of spawned tasks that have not completed.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.task_count()
    }

    /// Drives the executor until `future` completes.
    ///
    /// Spawned tasks and scheduled callbacks run while the future is pending.
    /// Tasks still pending when the future completes stay in the runtime.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Deadlock`](crate::error::ErrorKind::Deadlock) if the
    ///   future can never complete.
    /// - [`ErrorKind::StepLimit`](crate::error::ErrorKind::StepLimit) if
    ///   `max_steps` is set and exhausted.
    /// - [`ErrorKind::Internal`](crate::error::ErrorKind::Internal) if called
    ///   from inside a task of the same runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let _guard = self.state.enter()?;
        let start = self.state.steps();
        let root = TaskWaker::new(self.state.ready_queue(), ROOT_TASK);
        let waker = root.waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        root.schedule();

        loop {
            self.state.check_step_limit(start)?;
            if let Some(id) = self.state.pop_ready() {
                if id == ROOT_TASK {
                    root.clear();
                    self.state.count_step();
                    if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                        debug!(steps = self.state.steps() - start, "block_on completed");
                        return Ok(output);
                    }
                } else {
                    self.state.poll_task(id);
                }
                continue;
            }
            if self.state.run_due_timers(start)? > 0 {
                continue;
            }
            if !self.state.advance_clock() {
                return Err(self.state.deadlock());
            }
        }
    }

    /// Runs tasks and callbacks until nothing is ready and no timer is armed.
    ///
    /// Tasks blocked forever are left in place; this is not an error.
    /// Returns the number of steps executed.
    pub fn run_until_idle(&self) -> Result<u64> {
        let _guard = self.state.enter()?;
        let start = self.state.steps();
        loop {
            self.state.check_step_limit(start)?;
            if let Some(id) = self.state.pop_ready() {
                self.state.poll_task(id);
                continue;
            }
            if self.state.run_due_timers(start)? > 0 {
                continue;
            }
            if !self.state.advance_clock() {
                return Ok(self.state.steps() - start);
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.state.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("state", &self.state).finish()
    }
}

/// A cloneable reference to a [`Runtime`].
///
/// Handles are `!Send`: they can only be used on the executor thread.
#[derive(Clone)]
pub struct Handle {
    state: Rc<RuntimeState>,
}

impl Handle {
    /// Spawns a task and returns a handle to its output.
    ///
    /// The task is first polled on a later tick, never synchronously.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let id = self.state.allocate_task_id();
        let result = Deferred::new();
        let sink = result.clone();
        self.state.insert_task(
            id,
            Box::pin(async move {
                let output = future.await;
                let _ = sink.resolve(output);
            }),
        );
        JoinHandle::new(id, result)
    }

    /// Spawns a task whose failure is delivered through its [`JoinHandle`].
    ///
    /// The error is tagged with the task's ID.
    pub fn spawn_fallible<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let id = self.state.allocate_task_id();
        let result = Deferred::new();
        let sink = result.clone();
        self.state.insert_task(
            id,
            Box::pin(async move {
                let outcome = future.await.map_err(|err| {
                    debug!(task_id = %id, error = %err, "task failed");
                    err.with_task(id)
                });
                let _ = sink.settle(outcome);
            }),
        );
        JoinHandle::new(id, result)
    }

    /// Runs `callback` once `delay` has elapsed.
    ///
    /// `Duration::ZERO` means "on the next tick": the callback never runs
    /// inside the current call stack.
    pub fn schedule_later<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.state.schedule_later(delay, Box::new(callback));
    }

    /// Returns a future that completes after `duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self, duration)
    }

    /// Returns a deferred resolved with `value` after `duration`.
    #[must_use]
    pub fn timer<T: 'static>(&self, duration: Duration, value: T) -> Deferred<T> {
        let deferred = Deferred::new();
        let sink = deferred.clone();
        self.schedule_later(duration, move || {
            let _ = sink.resolve(value);
        });
        deferred
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.state.now()
    }

    /// Creates a channel using the runtime's default waiter policy.
    #[must_use]
    pub fn channel<T: 'static>(&self, capacity: usize) -> Channel<T> {
        Channel::with_policy(self, capacity, self.state.config().waiter_policy)
    }

    /// Creates a channel with an explicit waiter policy.
    #[must_use]
    pub fn channel_with_policy<T: 'static>(
        &self,
        capacity: usize,
        policy: WaiterPolicy,
    ) -> Channel<T> {
        Channel::with_policy(self, capacity, policy)
    }

    /// Returns the number of spawned tasks that have not completed.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.task_count()
    }

    /// Returns the number of armed callbacks.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.state.timer_count()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("now", &self.now()).finish()
    }
}
