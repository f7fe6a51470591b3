//! Test utilities for coopsync.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Runtime constructors and an async test runner
//! - Wakers for polling futures by hand
//!
//! # Example
//! ```ignore
//! use crate::test_utils::{init_test_logging, run_test};
//!
//! fn my_async_test() {
//!     init_test_logging();
//!     run_test(|handle| async move {
//!         handle.sleep(std::time::Duration::from_millis(1)).await;
//!     });
//! }
//! ```

use crate::runtime::{Handle, Runtime, RuntimeBuilder};
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll, Wake, Waker};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Create a virtual-clock runtime for testing.
#[must_use]
pub fn test_runtime() -> Runtime {
    RuntimeBuilder::new()
        .max_steps(100_000)
        .build()
        .expect("failed to build test runtime")
}

/// Run async test code on a fresh virtual-clock runtime.
pub fn run_test<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Handle) -> Fut,
    Fut: Future<Output = T>,
{
    init_test_logging();
    let runtime = test_runtime();
    let handle = runtime.handle();
    runtime
        .block_on(f(handle))
        .expect("test future did not complete")
}

/// Waker that counts how many times it was woken.
#[derive(Debug, Clone)]
pub struct CountingWaker {
    hits: Arc<Hits>,
    waker: Waker,
}

#[derive(Debug, Default)]
struct Hits(AtomicUsize);

impl Wake for Hits {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingWaker {
    /// Creates a waker with a zero count.
    #[must_use]
    pub fn new() -> Self {
        let hits = Arc::new(Hits::default());
        let waker = Waker::from(Arc::clone(&hits));
        Self { hits, waker }
    }

    /// Returns the waker.
    #[must_use]
    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Returns how many wakes were observed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.hits.0.load(Ordering::SeqCst)
    }
}

impl Default for CountingWaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls a future exactly once with a throwaway waker.
pub fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
    let waker = CountingWaker::new();
    let mut cx = Context::from_waker(waker.waker());
    let future = pin!(future);
    future.poll(&mut cx)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a result failed with a specific [`ErrorKind`](crate::error::ErrorKind).
#[macro_export]
macro_rules! assert_err_kind {
    ($result:expr, $kind:expr) => {
        match $result {
            Err(err) => assert_eq!(err.kind(), $kind, "unexpected error: {err}"),
            Ok(v) => unreachable!("expected Err({:?}), got Ok({:?})", $kind, v),
        }
    };
}
