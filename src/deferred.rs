//! Single-assignment resolvable values.
//!
//! A [`Deferred<T>`] is the future contract every primitive in this crate is
//! built on. It holds either nothing yet, a value, or a failure, and it can be
//! settled exactly once:
//!
//! ```text
//!   Pending ──resolve/fail──► Settling ──callbacks run──► Settled ──take──► Taken
//!      │                          ▲                           │
//!      └── add_callback ──────────┘ (late callbacks queued)    └── wait (clone)
//! ```
//!
//! Two ways to observe the outcome:
//!
//! - **Continuations**: [`Deferred::add_callback`] registers a closure that is
//!   invoked exactly once with a reference to the outcome. Any number may be
//!   registered, before or after settlement.
//! - **Suspension**: [`Deferred::take`] moves the outcome out (single consumer);
//!   [`Deferred::wait`] clones it (broadcast, requires `T: Clone`).
//!
//! Settling twice is a contract violation and returns
//! [`ErrorKind::AlreadyResolved`]; it never overwrites the first outcome.
//!
//! Handles are `Rc`-based and therefore confined to the executor thread.

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{trace, warn};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

type Callback<T> = Box<dyn FnOnce(&Result<T>)>;
type Wakers = SmallVec<[Waker; 1]>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Wakers,
    },
    /// Outcome is being handed to continuations; registrations made by those
    /// continuations land in `late`.
    Settling {
        late: Vec<Callback<T>>,
        wakers: Wakers,
    },
    Settled(Result<T>),
    Taken,
}

impl<T> State<T> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Settling { .. } => "settling",
            Self::Settled(Ok(_)) => "resolved",
            Self::Settled(Err(_)) => "failed",
            Self::Taken => "taken",
        }
    }

    fn settling() -> Self {
        Self::Settling {
            late: Vec::new(),
            wakers: Wakers::new(),
        }
    }
}

/// A single-assignment value with continuation registration.
///
/// Cloning a `Deferred` yields another handle to the same slot.
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Deferred<T> {
    /// Creates an unresolved deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending {
                callbacks: Vec::new(),
                wakers: Wakers::new(),
            })),
        }
    }

    /// Creates a deferred that is already resolved with `value`.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Settled(Ok(value)))),
        }
    }

    /// Creates a deferred that already carries `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Settled(Err(error)))),
        }
    }

    /// Resolves the deferred with a value.
    ///
    /// Continuations run synchronously, in registration order. Suspended
    /// awaiters are woken and resume on a later scheduler step.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyResolved`] if the deferred was already settled.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settles the deferred with a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyResolved`] if the deferred was already settled.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.settle(Err(error))
    }

    /// Settles the deferred with either outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyResolved`] if the deferred was already settled.
    pub fn settle(&self, outcome: Result<T>) -> Result<()> {
        let callbacks = {
            // A continuation settling its own deferred finds the cell borrowed
            // or in `Settling`; both are double resolves.
            let Ok(mut state) = self.state.try_borrow_mut() else {
                warn!("deferred settled from inside its own settlement");
                return Err(Error::already_resolved());
            };
            match &mut *state {
                State::Pending { callbacks, wakers } => {
                    let callbacks = mem::take(callbacks);
                    let wakers = mem::take(wakers);
                    *state = State::Settling {
                        late: Vec::new(),
                        wakers,
                    };
                    callbacks
                }
                other => {
                    warn!(state = other.name(), "deferred resolved more than once");
                    return Err(Error::already_resolved());
                }
            }
        };
        self.finish(outcome, callbacks);
        Ok(())
    }

    /// Runs continuations against `outcome`, then publishes it and wakes awaiters.
    fn finish(&self, outcome: Result<T>, mut callbacks: Vec<Callback<T>>) {
        loop {
            for callback in callbacks.drain(..) {
                callback(&outcome);
            }
            let mut state = self.state.borrow_mut();
            let State::Settling { late, wakers } = &mut *state else {
                debug_assert!(false, "deferred left the settling state early");
                return;
            };
            if late.is_empty() {
                let wakers = mem::take(wakers);
                *state = State::Settled(outcome);
                drop(state);
                for waker in wakers {
                    waker.wake();
                }
                return;
            }
            callbacks = mem::take(late);
        }
    }

    /// Registers a continuation invoked exactly once with the outcome.
    ///
    /// If the deferred is already settled the continuation runs immediately.
    /// If the value was already moved out by [`take`](Self::take), the
    /// continuation observes [`ErrorKind::AlreadyTaken`].
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T>) + 'static,
    {
        let callback: Callback<T> = Box::new(callback);
        let mut state = self.state.borrow_mut();
        match &mut *state {
            State::Pending { callbacks, .. } => {
                callbacks.push(callback);
                return;
            }
            State::Settling { late, .. } => {
                late.push(callback);
                return;
            }
            State::Settled(_) | State::Taken => {}
        }

        let previous = mem::replace(&mut *state, State::settling());
        drop(state);
        match previous {
            State::Settled(outcome) => self.finish(outcome, vec![callback]),
            _ => {
                *self.state.borrow_mut() = State::Taken;
                trace!("continuation registered after the value was taken");
                callback(&Err(Error::new(ErrorKind::AlreadyTaken)));
            }
        }
    }

    /// Returns true once the deferred has been resolved or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(&*self.state.borrow(), State::Pending { .. })
    }

    /// Returns true if this handle and `other` refer to the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Returns a future that moves the outcome out of the deferred.
    ///
    /// Only one awaiter may take the value; later awaiters (and later
    /// `wait`s) observe [`ErrorKind::AlreadyTaken`].
    #[must_use]
    pub fn take(self) -> Take<T> {
        Take { deferred: self }
    }

    /// Moves the outcome out if the deferred is settled and not yet taken.
    pub(crate) fn take_settled(&self) -> Option<Result<T>> {
        let mut state = self.state.borrow_mut();
        if !matches!(*state, State::Settled(_)) {
            return None;
        }
        match mem::replace(&mut *state, State::Taken) {
            State::Settled(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn register(wakers: &mut Wakers, waker: &Waker) {
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns a future that resolves to a clone of the outcome.
    ///
    /// Any number of tasks may wait on the same deferred; they all observe
    /// the same value.
    #[must_use]
    pub fn wait(&self) -> Wait<T> {
        Wait {
            deferred: self.clone(),
        }
    }

    /// Returns a clone of the outcome if the deferred is settled.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.state.borrow() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Taken => Some(Err(Error::new(ErrorKind::AlreadyTaken))),
            State::Pending { .. } | State::Settling { .. } => None,
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .state
            .try_borrow()
            .map_or("settling", |state| state.name());
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

/// Future returned by [`Deferred::take`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Take<T> {
    deferred: Deferred<T>,
}

impl<T> Take<T> {
    /// Returns the deferred this future takes from.
    #[must_use]
    pub fn deferred(&self) -> &Deferred<T> {
        &self.deferred
    }
}

impl<T> Future for Take<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.deferred.state.borrow_mut();
        match &mut *state {
            State::Pending { wakers, .. } | State::Settling { wakers, .. } => {
                Deferred::<T>::register(wakers, cx.waker());
                return Poll::Pending;
            }
            State::Taken => return Poll::Ready(Err(Error::new(ErrorKind::AlreadyTaken))),
            State::Settled(_) => {}
        }
        match mem::replace(&mut *state, State::Taken) {
            State::Settled(outcome) => Poll::Ready(outcome),
            _ => Poll::Ready(Err(Error::internal("deferred changed state while polled"))),
        }
    }
}

/// Future returned by [`Deferred::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T> {
    deferred: Deferred<T>,
}

impl<T: Clone> Future for Wait<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.deferred.state.borrow_mut();
        match &mut *state {
            State::Pending { wakers, .. } | State::Settling { wakers, .. } => {
                Deferred::<T>::register(wakers, cx.waker());
                Poll::Pending
            }
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Taken => Poll::Ready(Err(Error::new(ErrorKind::AlreadyTaken))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once, CountingWaker};
    use std::cell::Cell;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn resolve_then_take() {
        init_test("resolve_then_take");
        let df = Deferred::new();
        df.resolve(42).expect("first resolve");
        assert!(df.is_settled());
        let out = poll_once(df.take());
        assert!(matches!(out, Poll::Ready(Ok(42))));
        crate::test_complete!("resolve_then_take");
    }

    #[test]
    fn second_resolve_is_contract_violation() {
        init_test("second_resolve_is_contract_violation");
        let df = Deferred::new();
        df.resolve(1).expect("first resolve");
        let err = df.resolve(2).expect_err("second resolve must fail");
        assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
        assert!(matches!(df.peek(), Some(Ok(1))));

        let err = df.fail(Error::user("late")).expect_err("fail after resolve");
        assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
        crate::test_complete!("second_resolve_is_contract_violation");
    }

    #[test]
    fn callbacks_run_once_in_order() {
        init_test("callbacks_run_once_in_order");
        let df = Deferred::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Rc::clone(&seen);
            df.add_callback(move |out: &Result<i32>| {
                seen.borrow_mut().push((tag, *out.as_ref().expect("value")));
            });
        }
        df.resolve(5).expect("resolve");
        assert_eq!(*seen.borrow(), vec![("a", 5), ("b", 5)]);
        crate::test_complete!("callbacks_run_once_in_order");
    }

    #[test]
    fn callback_after_settle_runs_immediately() {
        init_test("callback_after_settle_runs_immediately");
        let df = Deferred::resolved("done");
        let hit = Rc::new(Cell::new(false));
        let flag = Rc::clone(&hit);
        df.add_callback(move |out| {
            assert!(matches!(out, Ok("done")));
            flag.set(true);
        });
        assert!(hit.get());
        // Still observable afterwards.
        assert!(matches!(df.peek(), Some(Ok("done"))));
        crate::test_complete!("callback_after_settle_runs_immediately");
    }

    #[test]
    fn resolving_from_own_callback_fails() {
        init_test("resolving_from_own_callback_fails");
        let df = Deferred::new();
        let inner = df.clone();
        let verdict = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&verdict);
        df.add_callback(move |_| {
            *slot.borrow_mut() = Some(inner.resolve(9));
        });
        df.resolve(1).expect("resolve");
        let verdict = verdict.borrow_mut().take().expect("callback ran");
        assert_eq!(
            verdict.expect_err("nested resolve").kind(),
            ErrorKind::AlreadyResolved
        );
        assert!(matches!(df.peek(), Some(Ok(1))));
        crate::test_complete!("resolving_from_own_callback_fails");
    }

    #[test]
    fn callback_registered_during_settlement_runs() {
        init_test("callback_registered_during_settlement_runs");
        let df = Deferred::new();
        let inner = df.clone();
        let count = Rc::new(Cell::new(0));
        let outer_count = Rc::clone(&count);
        df.add_callback(move |_| {
            outer_count.set(outer_count.get() + 1);
            let late_count = Rc::clone(&outer_count);
            inner.add_callback(move |out: &Result<u8>| {
                assert!(matches!(out, Ok(3)));
                late_count.set(late_count.get() + 10);
            });
        });
        df.resolve(3).expect("resolve");
        assert_eq!(count.get(), 11);
        crate::test_complete!("callback_registered_during_settlement_runs");
    }

    #[test]
    fn take_registers_waker_and_is_woken() {
        init_test("take_registers_waker_and_is_woken");
        let df: Deferred<&str> = Deferred::new();
        let waker = CountingWaker::new();
        let mut fut = df.clone().take();
        let mut cx = Context::from_waker(waker.waker());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        // Re-polling with the same waker does not register twice.
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        df.resolve("hi").expect("resolve");
        assert_eq!(waker.count(), 1);
        assert!(matches!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(Ok("hi"))));
        crate::test_complete!("take_registers_waker_and_is_woken");
    }

    #[test]
    fn take_twice_reports_already_taken() {
        init_test("take_twice_reports_already_taken");
        let df = Deferred::resolved(String::from("once"));
        let first = poll_once(df.clone().take());
        assert!(matches!(first, Poll::Ready(Ok(ref s)) if s == "once"));
        let second = poll_once(df.clone().take());
        match second {
            Poll::Ready(Err(err)) => assert_eq!(err.kind(), ErrorKind::AlreadyTaken),
            other => unreachable!("expected AlreadyTaken, got {other:?}"),
        }
        crate::test_complete!("take_twice_reports_already_taken");
    }

    #[test]
    fn wait_broadcasts_to_every_awaiter() {
        init_test("wait_broadcasts_to_every_awaiter");
        let df = Deferred::new();
        let first = df.wait();
        let second = df.wait();
        df.resolve(7_u32).expect("resolve");
        assert!(matches!(poll_once(first), Poll::Ready(Ok(7))));
        assert!(matches!(poll_once(second), Poll::Ready(Ok(7))));
        crate::test_complete!("wait_broadcasts_to_every_awaiter");
    }

    #[test]
    fn failure_propagates_to_awaiter() {
        init_test("failure_propagates_to_awaiter");
        let df: Deferred<u8> = Deferred::new();
        df.fail(Error::user("exploded")).expect("fail");
        match poll_once(df.wait()) {
            Poll::Ready(Err(err)) => {
                assert_eq!(err.kind(), ErrorKind::User);
                assert_eq!(err.message(), Some("exploded"));
            }
            other => unreachable!("expected failure, got {other:?}"),
        }
        crate::test_complete!("failure_propagates_to_awaiter");
    }

    #[test]
    fn debug_reports_state() {
        init_test("debug_reports_state");
        let df: Deferred<u8> = Deferred::new();
        assert!(format!("{df:?}").contains("pending"));
        df.resolve(1).expect("resolve");
        assert!(format!("{df:?}").contains("resolved"));
        let _ = poll_once(df.clone().take());
        assert!(format!("{df:?}").contains("taken"));
        crate::test_complete!("debug_reports_state");
    }
}
