//! Bounded rendezvous channel for cooperatively scheduled tasks.
//!
//! A [`Channel`] moves values from producer tasks to consumer tasks on a
//! single-threaded runtime. It needs no locks: its state is only touched
//! between suspension points of the task currently running.
//!
//! # Semantics
//!
//! - `send` with no blocked consumer appends to the buffer, blocking first
//!   while the buffer holds `capacity` values. This path never hands a value
//!   directly to a consumer.
//! - `send` with a blocked consumer hands the value over through a zero-delay
//!   callback and returns at once. The buffer is empty whenever a consumer is
//!   blocked.
//! - `receive` pops the front of the buffer, or blocks as the pending
//!   consumer. Either way a blocked producer is woken (again through a
//!   zero-delay callback) since a slot just freed up or a consumer arrived.
//!
//! With `capacity == 0` every transfer is a rendezvous taking two scheduling
//! hops: the consumer wakes the producer, then the producer hands the value
//! to the consumer. No value is ever observable in the buffer.
//!
//! Values passing through the buffer keep FIFO order. Blocking is
//! suspension, not an error; there is no close or timeout.
//!
//! # Dropped calls
//!
//! A blocked `send` or `receive` whose future is dropped unregisters itself.
//! A consumer dropped after a value was handed to it puts the value back at
//! the front of the buffer (or hands it to the next blocked consumer), so
//! the buffer may briefly hold more than `capacity` values. A producer
//! dropped after being woken passes the wake on to the next blocked
//! producer.
//!
//! # Blocked waiters
//!
//! Under the default [`WaiterPolicy::SingleSlot`] a channel serves one
//! producer and one consumer at a time. A second caller blocking in the same
//! direction displaces the first, which fails with
//! [`ErrorKind::WaiterDisplaced`](crate::error::ErrorKind::WaiterDisplaced).
//! [`WaiterPolicy::Queued`] queues blocked callers instead.
//!
//! # Example
//!
//! ```ignore
//! let chan = handle.channel::<&str>(0);
//! let consumer = chan.clone();
//! handle.spawn(async move { consumer.receive().await });
//! chan.send("ping").await?; // returns once the consumer is waiting
//! ```

mod waiters;

pub use waiters::WaiterPolicy;

use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::runtime::Handle;
use crate::tracing_compat::{trace, warn};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use waiters::Waiters;

/// Counters describing a channel's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Values accepted by `send`/`try_send`.
    pub sent: u64,
    /// Values delivered to `receive`/`try_receive`.
    pub received: u64,
    /// Values handed directly to a blocked consumer.
    pub handoffs: u64,
    /// Blocked waiters displaced under [`WaiterPolicy::SingleSlot`].
    pub displaced: u64,
}

/// Error returned by [`Channel::try_send`] when the value cannot be accepted
/// without blocking. Carries the value back to the caller.
#[derive(PartialEq, Eq)]
pub struct TrySendError<T>(pub T);

impl<T> TrySendError<T> {
    /// Returns the value that was not sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrySendError(..)")
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("channel is full")
    }
}

impl<T> std::error::Error for TrySendError<T> {}

struct Inner<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    consumers: Waiters<Deferred<T>>,
    producers: Waiters<Deferred<()>>,
    stats: ChannelStats,
}

enum Receive<T> {
    Ready(T),
    Blocked {
        waiter: Deferred<T>,
        displaced: Option<Deferred<T>>,
    },
}

/// A bounded FIFO channel between cooperatively scheduled tasks.
///
/// Cloning yields another handle to the same channel.
pub struct Channel<T> {
    inner: Rc<RefCell<Inner<T>>>,
    handle: Handle,
}

impl<T: 'static> Channel<T> {
    /// Creates a channel with the default [`WaiterPolicy::SingleSlot`].
    ///
    /// `capacity == 0` makes every transfer a rendezvous.
    #[must_use]
    pub fn new(handle: &Handle, capacity: usize) -> Self {
        Self::with_policy(handle, capacity, WaiterPolicy::SingleSlot)
    }

    /// Creates a channel with an explicit waiter policy.
    #[must_use]
    pub fn with_policy(handle: &Handle, capacity: usize, policy: WaiterPolicy) -> Self {
        trace!(capacity, policy = %policy, "channel created");
        Self {
            inner: Rc::new(RefCell::new(Inner {
                capacity,
                buffer: VecDeque::with_capacity(capacity),
                consumers: Waiters::new(policy),
                producers: Waiters::new(policy),
                stats: ChannelStats::default(),
            })),
            handle: handle.clone(),
        }
    }

    /// Sends a value, blocking while the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WaiterDisplaced`](crate::error::ErrorKind::WaiterDisplaced)
    /// if this call was blocked and another producer took its slot. The value
    /// is dropped in that case.
    pub async fn send(&self, value: T) -> Result<()> {
        loop {
            let blocked = {
                let mut inner = self.inner.borrow_mut();
                if let Some(consumer) = inner.consumers.pop() {
                    debug_assert!(inner.buffer.is_empty(), "consumer blocked on a non-empty buffer");
                    inner.stats.sent += 1;
                    inner.stats.handoffs += 1;
                    drop(inner);
                    self.hand_off(consumer, value);
                    return Ok(());
                }
                if inner.buffer.len() < inner.capacity {
                    inner.buffer.push_back(value);
                    inner.stats.sent += 1;
                    return Ok(());
                }

                let waiter = Deferred::new();
                let displaced = inner.producers.push(waiter.clone());
                if displaced.is_some() {
                    inner.stats.displaced += 1;
                }
                trace!(capacity = inner.capacity, "producer blocked");
                drop(inner);
                if let Some(displaced) = displaced {
                    Self::displace(displaced, "send");
                }
                waiter
            };
            // Woken by a receive; re-check whether a consumer is now waiting
            // or another producer refilled the buffer.
            let pending = PendingSend {
                chan: self,
                waiter: blocked.clone(),
                armed: true,
            };
            let woken = blocked.take().await;
            pending.disarm();
            woken?;
        }
    }

    /// Receives the next value, blocking while the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WaiterDisplaced`](crate::error::ErrorKind::WaiterDisplaced)
    /// if this call was blocked and another consumer took its slot.
    pub async fn receive(&self) -> Result<T> {
        let (waiter, displaced) = {
            let mut inner = self.inner.borrow_mut();
            let producer = inner.producers.pop();
            let outcome = match inner.buffer.pop_front() {
                Some(value) => {
                    inner.stats.received += 1;
                    Receive::Ready(value)
                }
                None => {
                    let waiter = Deferred::new();
                    let displaced = inner.consumers.push(waiter.clone());
                    if displaced.is_some() {
                        inner.stats.displaced += 1;
                    }
                    trace!(capacity = inner.capacity, "consumer blocked");
                    Receive::Blocked { waiter, displaced }
                }
            };
            drop(inner);
            if let Some(producer) = producer {
                self.wake_producer(producer);
            }
            match outcome {
                Receive::Ready(value) => return Ok(value),
                Receive::Blocked { waiter, displaced } => (waiter, displaced),
            }
        };
        if let Some(displaced) = displaced {
            Self::displace(displaced, "receive");
        }

        let pending = PendingReceive {
            chan: self,
            waiter: waiter.clone(),
            armed: true,
        };
        let outcome = waiter.take().await;
        pending.disarm();
        let value = outcome?;
        self.inner.borrow_mut().stats.received += 1;
        Ok(value)
    }

    /// Sends without blocking.
    ///
    /// Hands the value to a blocked consumer or buffers it if there is room.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`TrySendError`] when `send` would block.
    pub fn try_send(&self, value: T) -> core::result::Result<(), TrySendError<T>> {
        let mut inner = self.inner.borrow_mut();
        if let Some(consumer) = inner.consumers.pop() {
            inner.stats.sent += 1;
            inner.stats.handoffs += 1;
            drop(inner);
            self.hand_off(consumer, value);
            return Ok(());
        }
        if inner.buffer.len() < inner.capacity {
            inner.buffer.push_back(value);
            inner.stats.sent += 1;
            return Ok(());
        }
        Err(TrySendError(value))
    }

    /// Receives a buffered value without blocking.
    ///
    /// Returns `None` if the buffer is empty; the caller is not registered
    /// as a consumer, so with `capacity == 0` this always returns `None`.
    pub fn try_receive(&self) -> Option<T> {
        let mut inner = self.inner.borrow_mut();
        let value = inner.buffer.pop_front()?;
        inner.stats.received += 1;
        let producer = inner.producers.pop();
        drop(inner);
        if let Some(producer) = producer {
            self.wake_producer(producer);
        }
        Some(value)
    }

    fn hand_off(&self, consumer: Deferred<T>, value: T) {
        trace!("handing value to blocked consumer");
        let chan = self.clone();
        self.handle.schedule_later(Duration::ZERO, move || {
            if consumer.is_settled() {
                // The receive was dropped while the value was in flight.
                chan.restore(value);
            } else {
                let _ = consumer.resolve(value);
            }
        });
    }

    fn wake_producer(&self, producer: Deferred<()>) {
        trace!("waking blocked producer");
        self.handle.schedule_later(Duration::ZERO, move || {
            let _ = producer.resolve(());
        });
    }

    /// Returns a value taken by a dropped receive: to the next blocked
    /// consumer, otherwise to the front of the buffer.
    fn restore(&self, value: T) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            warn!("channel busy; value of a dropped receive discarded");
            return;
        };
        if let Some(consumer) = inner.consumers.pop() {
            inner.stats.handoffs += 1;
            drop(inner);
            self.hand_off(consumer, value);
        } else {
            inner.buffer.push_front(value);
            trace!(len = inner.buffer.len(), "value of a dropped receive returned to the buffer");
        }
    }

    fn displace<W>(waiter: Deferred<W>, direction: &str) {
        warn!(direction, "blocked waiter displaced by a second concurrent caller");
        let _ = waiter.fail(Error::waiter_displaced(direction));
    }
}

/// Unregisters a blocked `receive` whose future is dropped.
struct PendingReceive<'a, T: 'static> {
    chan: &'a Channel<T>,
    waiter: Deferred<T>,
    armed: bool,
}

impl<T: 'static> PendingReceive<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: 'static> Drop for PendingReceive<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = match self.chan.inner.try_borrow_mut() {
            Ok(mut inner) => inner.consumers.remove_where(|w| w.ptr_eq(&self.waiter)),
            Err(_) => false,
        };
        if removed {
            trace!("dropped receive unregistered");
            return;
        }
        if !self.waiter.is_settled() {
            // Popped by a producer; its handoff callback sees the failure
            // and returns the value.
            let _ = self.waiter.fail(Error::internal("receive dropped before its handoff"));
        } else if let Some(Ok(value)) = self.waiter.take_settled() {
            self.chan.restore(value);
        }
    }
}

/// Unregisters a blocked `send` whose future is dropped.
struct PendingSend<'a, T: 'static> {
    chan: &'a Channel<T>,
    waiter: Deferred<()>,
    armed: bool,
}

impl<T: 'static> PendingSend<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: 'static> Drop for PendingSend<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(mut inner) = self.chan.inner.try_borrow_mut() else {
            return;
        };
        if inner.producers.remove_where(|w| w.ptr_eq(&self.waiter)) {
            trace!("dropped send unregistered");
            return;
        }
        // Already woken: the freed slot belongs to the next producer.
        let next = inner.producers.pop();
        drop(inner);
        if let Some(next) = next {
            self.chan.wake_producer(next);
        }
    }
}

impl<T> Channel<T> {
    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Returns the number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    /// Returns true if no value is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().buffer.is_empty()
    }

    /// Returns true if a consumer is blocked waiting for a value.
    #[must_use]
    pub fn has_pending_consumer(&self) -> bool {
        !self.inner.borrow().consumers.is_empty()
    }

    /// Returns true if a producer is blocked waiting for room.
    #[must_use]
    pub fn has_pending_producer(&self) -> bool {
        !self.inner.borrow().producers.is_empty()
    }

    /// Returns traffic counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.inner.borrow().stats
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            handle: self.handle.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Channel")
            .field("capacity", &inner.capacity)
            .field("len", &inner.buffer.len())
            .field("pending_consumers", &inner.consumers.len())
            .field("pending_producers", &inner.producers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::Runtime;
    use crate::test_utils::{init_test_logging, poll_once, CountingWaker};
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Polls a boxed future once, keeping it alive for the caller.
    fn poll_kept<F: Future>(future: &mut Pin<Box<F>>) -> Poll<F::Output> {
        let waker = CountingWaker::new();
        future.as_mut().poll(&mut Context::from_waker(waker.waker()))
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn sends_up_to_capacity_without_blocking() {
        init_test("sends_up_to_capacity_without_blocking");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 3);
        for v in 0..3 {
            assert!(matches!(poll_once(chan.send(v)), Poll::Ready(Ok(()))));
        }
        assert_eq!(chan.len(), 3);
        // The blocked send is dropped right after the poll and unregisters.
        assert!(poll_once(chan.send(3)).is_pending());
        assert!(!chan.has_pending_producer());
        assert_eq!(chan.len(), 3);
        crate::test_complete!("sends_up_to_capacity_without_blocking");
    }

    #[test]
    fn receive_pops_in_fifo_order() {
        init_test("receive_pops_in_fifo_order");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 2);
        chan.try_send('a').unwrap();
        chan.try_send('b').unwrap();
        assert!(matches!(poll_once(chan.receive()), Poll::Ready(Ok('a'))));
        assert_eq!(chan.try_receive(), Some('b'));
        assert_eq!(chan.try_receive(), None);
        crate::test_complete!("receive_pops_in_fifo_order");
    }

    #[test]
    fn try_send_returns_value_when_full() {
        init_test("try_send_returns_value_when_full");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 1);
        chan.try_send(String::from("kept")).unwrap();
        let err = chan.try_send(String::from("bounced")).unwrap_err();
        assert_eq!(err.to_string(), "channel is full");
        assert_eq!(err.into_inner(), "bounced");
        assert_eq!(chan.stats().sent, 1);
        crate::test_complete!("try_send_returns_value_when_full");
    }

    #[test]
    fn zero_capacity_try_operations_never_buffer() {
        init_test("zero_capacity_try_operations_never_buffer");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 0);
        assert!(chan.try_send(1).is_err());
        assert_eq!(chan.try_receive(), None);
        assert!(chan.is_empty());
        crate::test_complete!("zero_capacity_try_operations_never_buffer");
    }

    #[test]
    fn blocked_consumer_gets_handoff_on_next_tick() {
        init_test("blocked_consumer_gets_handoff_on_next_tick");
        let runtime = Runtime::new();
        let handle = runtime.handle();
        let chan = Channel::new(&handle, 4);
        let consumer = chan.clone();
        let join = handle.spawn_fallible(async move { consumer.receive().await });
        runtime.run_until_idle().unwrap();
        assert!(chan.has_pending_consumer());

        chan.try_send(11).unwrap();
        // Handed off, not buffered.
        assert!(chan.is_empty());
        assert!(!chan.has_pending_consumer());
        assert!(!join.is_finished());

        assert_eq!(runtime.block_on(join).unwrap().unwrap(), 11);
        let stats = chan.stats();
        assert_eq!(stats.handoffs, 1);
        assert_eq!(stats.received, 1);
        crate::test_complete!("blocked_consumer_gets_handoff_on_next_tick");
    }

    #[test]
    fn second_blocked_consumer_displaces_first() {
        init_test("second_blocked_consumer_displaces_first");
        let runtime = Runtime::new();
        let handle = runtime.handle();
        let chan: Channel<u8> = Channel::new(&handle, 1);
        let first = {
            let chan = chan.clone();
            handle.spawn_fallible(async move { chan.receive().await })
        };
        runtime.run_until_idle().unwrap();
        let second = {
            let chan = chan.clone();
            handle.spawn_fallible(async move { chan.receive().await })
        };
        runtime.run_until_idle().unwrap();

        let err = runtime.block_on(first).unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WaiterDisplaced);
        assert_eq!(chan.stats().displaced, 1);

        chan.try_send(9).unwrap();
        assert_eq!(runtime.block_on(second).unwrap().unwrap(), 9);
        crate::test_complete!("second_blocked_consumer_displaces_first");
    }

    #[test]
    fn dropped_receive_leaves_next_value_buffered() {
        init_test("dropped_receive_leaves_next_value_buffered");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 1);
        assert!(poll_once(chan.receive()).is_pending());
        assert!(!chan.has_pending_consumer());

        chan.try_send(7).unwrap();
        assert_eq!(chan.len(), 1);
        assert_eq!(chan.stats().handoffs, 0);
        assert!(matches!(poll_once(chan.receive()), Poll::Ready(Ok(7))));
        crate::test_complete!("dropped_receive_leaves_next_value_buffered");
    }

    #[test]
    fn receive_dropped_during_handoff_returns_value() {
        init_test("receive_dropped_during_handoff_returns_value");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 0);
        let mut pending = Box::pin(chan.receive());
        assert!(poll_kept(&mut pending).is_pending());

        chan.try_send(5).unwrap();
        drop(pending);
        runtime.run_until_idle().unwrap();
        assert_eq!(chan.try_receive(), Some(5));
        crate::test_complete!("receive_dropped_during_handoff_returns_value");
    }

    #[test]
    fn receive_dropped_after_handoff_returns_value() {
        init_test("receive_dropped_after_handoff_returns_value");
        let runtime = Runtime::new();
        let chan = Channel::new(&runtime.handle(), 2);
        let mut pending = Box::pin(chan.receive());
        assert!(poll_kept(&mut pending).is_pending());

        chan.try_send('x').unwrap();
        runtime.run_until_idle().unwrap();
        chan.try_send('y').unwrap();
        drop(pending);
        // The delivered value goes back in front of the later one.
        assert_eq!(chan.try_receive(), Some('x'));
        assert_eq!(chan.try_receive(), Some('y'));
        crate::test_complete!("receive_dropped_after_handoff_returns_value");
    }

    #[test]
    fn dropped_queued_send_lets_next_producer_through() {
        init_test("dropped_queued_send_lets_next_producer_through");
        let runtime = Runtime::new();
        let handle = runtime.handle();
        let chan = Channel::with_policy(&handle, 0, WaiterPolicy::Queued);
        assert!(poll_once(chan.send(1)).is_pending());
        assert!(!chan.has_pending_producer());

        let producer = {
            let chan = chan.clone();
            handle.spawn_fallible(async move { chan.send(2).await })
        };
        let consumer = {
            let chan = chan.clone();
            handle.spawn_fallible(async move { chan.receive().await })
        };
        assert_eq!(runtime.block_on(consumer).unwrap().unwrap(), 2);
        runtime.run_until_idle().unwrap();
        assert!(producer.is_finished());
        crate::test_complete!("dropped_queued_send_lets_next_producer_through");
    }

    #[test]
    fn woken_send_dropped_passes_wake_on() {
        init_test("woken_send_dropped_passes_wake_on");
        let runtime = Runtime::new();
        let handle = runtime.handle();
        let chan = Channel::with_policy(&handle, 1, WaiterPolicy::Queued);
        chan.try_send(0).unwrap();
        let mut first = Box::pin(chan.send(1));
        assert!(poll_kept(&mut first).is_pending());
        let second = {
            let chan = chan.clone();
            handle.spawn_fallible(async move { chan.send(2).await })
        };
        runtime.run_until_idle().unwrap();

        // Frees the slot and wakes `first`, which is then dropped.
        assert_eq!(chan.try_receive(), Some(0));
        drop(first);
        runtime.run_until_idle().unwrap();
        assert!(second.is_finished());
        assert_eq!(chan.try_receive(), Some(2));
        crate::test_complete!("woken_send_dropped_passes_wake_on");
    }

    #[test]
    fn debug_lists_waiters() {
        init_test("debug_lists_waiters");
        let runtime = Runtime::new();
        let chan: Channel<()> = Channel::with_policy(&runtime.handle(), 2, WaiterPolicy::Queued);
        let text = format!("{chan:?}");
        assert!(text.contains("capacity: 2"), "{text}");
        assert!(text.contains("pending_consumers: 0"), "{text}");
        crate::test_complete!("debug_lists_waiters");
    }
}
