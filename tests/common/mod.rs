//! Helpers shared by the integration tests.
//!
//! Each test binary compiles this module and uses a different subset, so
//! helpers not called everywhere carry their own `dead_code` allowance.

use coopsync::runtime::{Handle, Runtime, RuntimeBuilder};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::task::{Context, Poll, Wake, Waker};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Step budget for test runtimes; a runaway test fails instead of hanging.
const TEST_MAX_STEPS: u64 = 1_000_000;
/// Seed used under CI when `COOPSYNC_PROPTEST_SEED` is unset.
const CI_PROPTEST_SEED: u64 = 0x5EED_5EED;

/// Proptest config running `cases` cases.
///
/// `COOPSYNC_PROPTEST_SEED` (or `CI`) fixes the seed unless
/// `PROPTEST_RNG_SEED` already did.
#[allow(dead_code)]
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    let seed = match std::env::var("COOPSYNC_PROPTEST_SEED") {
        Ok(value) => value.parse().ok(),
        Err(_) => std::env::var_os("CI").map(|_| CI_PROPTEST_SEED),
    };
    if let (RngSeed::Random, Some(seed)) = (&config.rng_seed, seed) {
        config.rng_seed = RngSeed::Fixed(seed);
    }
    config
}

/// Trace-level logging to the test writer.
#[allow(dead_code)]
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Serializes tests that touch `COOPSYNC_*` variables.
#[allow(dead_code)]
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Virtual-clock runtime with a step budget.
#[must_use]
pub fn test_runtime() -> Runtime {
    RuntimeBuilder::new()
        .max_steps(TEST_MAX_STEPS)
        .build()
        .expect("failed to build test runtime")
}

/// Runs `f` to completion on a fresh test runtime.
#[allow(dead_code)]
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

struct IgnoreWake;

impl Wake for IgnoreWake {
    fn wake(self: Arc<Self>) {}
}

/// Polls `future` once outside any runtime, then drops it.
#[allow(dead_code)]
pub fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
    let waker: Waker = Arc::new(IgnoreWake).into();
    pin!(future).poll(&mut Context::from_waker(&waker))
}

#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "==== TEST PHASE: {} ====", $name);
    };
}

#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed: {}", $name);
    };
}

/// Logs expected and actual values, then asserts.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(expected = ?$expected, actual = ?$actual, "asserting: {}", $msg);
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
