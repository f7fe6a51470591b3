//! Combinators over deferred operations.
//!
//! - [`race`]: wait on N operations, first success wins ([`first_of`])
//! - [`timeout`](mod@timeout): race an operation against a timer

pub mod race;
pub mod timeout;

pub use race::{
    first_of, first_of_reporting, first_of_slots, Continuation, FirstOf, RaceBranch, RaceWin,
};
pub use timeout::{timeout, Timeout};
