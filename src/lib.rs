//! coopsync: cooperative synchronization primitives for a single-threaded executor.
//!
//! # Overview
//!
//! coopsync coordinates independently scheduled tasks without locks or
//! threads. Tasks suspend only where they await a [`Deferred`] value and
//! resume when that value is resolved, often from a zero-delay callback so
//! a handoff never re-enters the caller's stack.
//!
//! # Primitives
//!
//! - **Channel**: bounded FIFO with backpressure; capacity 0 is a pure
//!   rendezvous between one producer and one consumer
//! - **Registry**: named wait/fire with broadcast delivery; fires with no
//!   waiter are dropped
//! - **Race**: [`first_of`] reports the first of N operations to succeed;
//!   losers keep running
//!
//! # Module Structure
//!
//! - [`deferred`]: Single-assignment values with continuations
//! - [`runtime`]: Executor, handles, configuration
//! - [`time`]: Sleep
//! - [`channel`]: Bounded rendezvous channel
//! - [`registry`]: Named wait/fire registry
//! - [`combinator`]: Race and timeout
//! - [`types`]: Identifiers and time
//! - [`error`]: Error types
//! - [`tracing_compat`]: Logging facade
//!
//! # Example
//!
//! ```ignore
//! use coopsync::{first_of, Runtime};
//! use std::time::Duration;
//!
//! let runtime = Runtime::new();
//! let handle = runtime.handle();
//! let slow = handle.timer(Duration::from_millis(100), "A");
//! let fast = handle.timer(Duration::from_millis(1), "B");
//! let win = runtime.block_on(first_of([slow, fast]))??;
//! assert_eq!((win.index, win.value), (1, "B"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod combinator;
pub mod deferred;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use channel::{Channel, ChannelStats, TrySendError, WaiterPolicy};
pub use combinator::{first_of, first_of_reporting, first_of_slots, timeout, RaceBranch, RaceWin};
pub use deferred::Deferred;
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use registry::Registry;
pub use runtime::{ClockMode, Handle, JoinHandle, Runtime, RuntimeBuilder, RuntimeConfig};
pub use time::Sleep;
pub use types::{TaskId, Time};
