//! Time primitives.
//!
//! - [`Sleep`]: a future that completes once a deadline has passed
//!
//! Time comes from the runtime's clock: with the virtual clock a sleep
//! completes as soon as the executor runs out of other work and jumps to the
//! deadline; with the wall clock the executor actually waits.
//!
//! Timeouts are built by racing against a timer, see
//! [`combinator::timeout`](crate::combinator::timeout).
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! handle.sleep(Duration::from_millis(100)).await;
//! ```

mod sleep;

pub use sleep::{sleep, Sleep};
