//! Blocked-waiter bookkeeping for one direction of a channel.

use crate::runtime::config::ConfigError;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// How a channel treats a second caller blocking in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaiterPolicy {
    /// At most one blocked producer and one blocked consumer.
    ///
    /// A second blocker takes the slot; the first is resumed with
    /// [`ErrorKind::WaiterDisplaced`](crate::error::ErrorKind::WaiterDisplaced).
    /// Suited to one producer and one consumer per channel.
    #[default]
    SingleSlot,
    /// Blocked callers queue FIFO per direction and none is displaced.
    ///
    /// This changes observable behavior compared to `SingleSlot`: with
    /// several producers, values are accepted in the order their producers
    /// blocked.
    Queued,
}

impl FromStr for WaiterPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" | "single-slot" | "single_slot" => Ok(Self::SingleSlot),
            "queued" | "queue" => Ok(Self::Queued),
            _ => Err(ConfigError::invalid("waiter_policy", "single or queued", s)),
        }
    }
}

impl fmt::Display for WaiterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleSlot => f.write_str("single"),
            Self::Queued => f.write_str("queued"),
        }
    }
}

/// Waiters blocked in one direction.
#[derive(Debug)]
pub(crate) struct Waiters<W> {
    policy: WaiterPolicy,
    blocked: VecDeque<W>,
}

impl<W> Waiters<W> {
    pub(crate) const fn new(policy: WaiterPolicy) -> Self {
        Self {
            policy,
            blocked: VecDeque::new(),
        }
    }

    /// Registers a waiter. Returns the waiter it displaced, if any.
    pub(crate) fn push(&mut self, waiter: W) -> Option<W> {
        match self.policy {
            WaiterPolicy::SingleSlot => {
                let displaced = self.blocked.pop_front();
                self.blocked.push_back(waiter);
                displaced
            }
            WaiterPolicy::Queued => {
                self.blocked.push_back(waiter);
                None
            }
        }
    }

    /// Removes the longest-waiting waiter.
    pub(crate) fn pop(&mut self) -> Option<W> {
        self.blocked.pop_front()
    }

    /// Removes the first waiter matching `pred`. Returns false if none did.
    pub(crate) fn remove_where(&mut self, pred: impl FnMut(&W) -> bool) -> bool {
        match self.blocked.iter().position(pred) {
            Some(index) => self.blocked.remove(index).is_some(),
            None => false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.blocked.len()
    }
}
