//! Race combinator: wait on N operations, first success wins.
//!
//! [`first_of`] registers a continuation on every branch. The first branch
//! to succeed wins exclusively; its index and value become the result.
//!
//! # Failures
//!
//! Branch failures arrive as explicit `Err` values and are folded into the
//! race state instead of escaping from the continuation:
//!
//! ```text
//!   branch i fails ─┬─ race undecided ──► recorded in RaceWin::failures
//!                   │                      (all N failed ─► AllBranchesFailed)
//!                   └─ race decided ────► orphaned: warn! + optional handler
//! ```
//!
//! # Losers are not cancelled
//!
//! Losing branches keep running to completion; their results are discarded
//! and their failures reported as orphaned. Race only work that is cheap
//! or idempotent, or that the caller cancels itself. The [`RaceBranch`] trait
//! is the seam where a cancelable branch type can be plugged in.
//!
//! A race over zero branches never resolves.

use crate::deferred::{Deferred, Take};
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::JoinHandle;
use crate::tracing_compat::{debug, trace, warn};
use std::cell::RefCell;
use std::fmt::Write as _;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Continuation handed to a [`RaceBranch`].
pub type Continuation<T> = Box<dyn FnOnce(Result<T>)>;

/// An operation that can take part in a race.
///
/// Implementations must invoke the continuation exactly once, with the
/// operation's value or its failure. They may invoke it synchronously if the
/// operation already completed.
pub trait RaceBranch<T> {
    /// Registers the continuation.
    fn on_settled(self, continuation: Continuation<T>);
}

impl<T: Clone + 'static> RaceBranch<T> for Deferred<T> {
    fn on_settled(self, continuation: Continuation<T>) {
        self.add_callback(move |outcome| continuation(outcome.clone()));
    }
}

impl<T: Clone + 'static> RaceBranch<T> for JoinHandle<T> {
    fn on_settled(self, continuation: Continuation<T>) {
        self.deferred().clone().on_settled(continuation);
    }
}

/// Outcome of a decided race.
#[derive(Debug, Clone)]
pub struct RaceWin<T> {
    /// Index of the winning branch.
    pub index: usize,
    /// Value of the winning branch.
    pub value: T,
    /// Number of branches in the race.
    pub branch_count: usize,
    /// Branches that failed before the race was decided.
    pub failures: Vec<(usize, Error)>,
}

impl<T> RaceWin<T> {
    /// Returns `(index, value)`.
    pub fn into_pair(self) -> (usize, T) {
        (self.index, self.value)
    }

    /// Projects the win onto one slot per branch: only the winner's slot is
    /// set, to `(true, value)`.
    pub fn into_slots(self) -> Vec<Option<(bool, T)>> {
        let mut slots: Vec<Option<(bool, T)>> = (0..self.branch_count).map(|_| None).collect();
        if let Some(slot) = slots.get_mut(self.index) {
            *slot = Some((true, self.value));
        }
        slots
    }
}

type OrphanHandler = Rc<dyn Fn(usize, &Error)>;

struct RaceState<T> {
    branch_count: usize,
    decided: bool,
    failures: Vec<(usize, Error)>,
    outcome: Deferred<RaceWin<T>>,
    on_orphan: Option<OrphanHandler>,
}

impl<T: 'static> RaceState<T> {
    fn settle(state: &Rc<RefCell<Self>>, index: usize, result: Result<T>) {
        let mut race = state.borrow_mut();
        match result {
            Ok(value) if !race.decided => {
                race.decided = true;
                let win = RaceWin {
                    index,
                    value,
                    branch_count: race.branch_count,
                    failures: mem::take(&mut race.failures),
                };
                let outcome = race.outcome.clone();
                drop(race);
                debug!(index, "race decided");
                let _ = outcome.resolve(win);
            }
            Ok(_) => trace!(index, "late race result discarded"),
            Err(error) if race.decided => {
                let handler = race.on_orphan.clone();
                drop(race);
                warn!(index, error = %error, "race branch failed after the race was decided");
                if let Some(handler) = handler {
                    handler(index, &error);
                }
            }
            Err(error) => {
                trace!(index, error = %error, "race branch failed");
                race.failures.push((index, error));
                if race.failures.len() < race.branch_count {
                    return;
                }
                race.decided = true;
                let failures = mem::take(&mut race.failures);
                let outcome = race.outcome.clone();
                drop(race);
                debug!(branches = failures.len(), "every race branch failed");
                let _ = outcome.fail(all_failed(failures));
            }
        }
    }
}

fn all_failed(failures: Vec<(usize, Error)>) -> Error {
    let mut message = format!("all {} race branches failed:", failures.len());
    for (index, error) in &failures {
        let _ = write!(message, " [{index}] {error};");
    }
    let mut error = Error::new(ErrorKind::AllBranchesFailed).with_message(message);
    if let Some((_, first)) = failures.into_iter().next() {
        error = error.with_source(first);
    }
    error
}

/// Future returned by [`first_of`].
#[must_use = "futures do nothing unless polled"]
pub struct FirstOf<T> {
    outcome: Take<RaceWin<T>>,
    branch_count: usize,
}

impl<T> FirstOf<T> {
    /// Returns the number of branches in the race.
    #[must_use]
    pub const fn branch_count(&self) -> usize {
        self.branch_count
    }

    /// Returns true once a branch won or every branch failed.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.outcome.deferred().is_settled()
    }
}

impl<T> Future for FirstOf<T> {
    type Output = Result<RaceWin<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome).poll(cx)
    }
}

impl<T> std::fmt::Debug for FirstOf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirstOf")
            .field("branch_count", &self.branch_count)
            .field("decided", &self.is_decided())
            .finish()
    }
}

/// Races `branches`; the first to succeed wins.
///
/// Continuations are registered immediately. Failures of losing branches
/// after the decision are logged; use [`first_of_reporting`] to observe them.
///
/// # Errors
///
/// The future fails with [`ErrorKind::AllBranchesFailed`] if every branch
/// failed.
pub fn first_of<T, I>(branches: I) -> FirstOf<T>
where
    T: 'static,
    I: IntoIterator,
    I::Item: RaceBranch<T>,
{
    start(branches, None)
}

/// Like [`first_of`], and calls `on_orphan(index, error)` for every branch
/// that fails after the race was decided.
pub fn first_of_reporting<T, I, F>(branches: I, on_orphan: F) -> FirstOf<T>
where
    T: 'static,
    I: IntoIterator,
    I::Item: RaceBranch<T>,
    F: Fn(usize, &Error) + 'static,
{
    start(branches, Some(Rc::new(on_orphan)))
}

/// Like [`first_of`], resolving to one slot per branch where only the
/// winner's slot holds `(true, value)`.
pub fn first_of_slots<T, I>(branches: I) -> impl Future<Output = Result<Vec<Option<(bool, T)>>>>
where
    T: 'static,
    I: IntoIterator,
    I::Item: RaceBranch<T>,
{
    let race = first_of(branches);
    async move { race.await.map(RaceWin::into_slots) }
}

fn start<T, I>(branches: I, on_orphan: Option<OrphanHandler>) -> FirstOf<T>
where
    T: 'static,
    I: IntoIterator,
    I::Item: RaceBranch<T>,
{
    let branches: Vec<I::Item> = branches.into_iter().collect();
    let branch_count = branches.len();
    let outcome = Deferred::new();
    let state = Rc::new(RefCell::new(RaceState {
        branch_count,
        decided: false,
        failures: Vec::new(),
        outcome: outcome.clone(),
        on_orphan,
    }));
    trace!(branch_count, "race started");

    for (index, branch) in branches.into_iter().enumerate() {
        let state = Rc::clone(&state);
        branch.on_settled(Box::new(move |result| {
            RaceState::settle(&state, index, result);
        }));
    }

    FirstOf {
        outcome: outcome.take(),
        branch_count,
    }
}
