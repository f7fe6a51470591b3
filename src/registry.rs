//! Named wait/fire rendezvous.
//!
//! A registry maps names to pending [`Deferred`] values:
//!
//! - [`Registry::wait`] gets or creates the deferred for a name and returns a
//!   future for its value. Every `wait` made before the matching `fire`
//!   shares that deferred, so all of them observe the same value.
//! - [`Registry::fire`] removes the deferred for a name and resolves it.
//!   If nobody is waiting the value is dropped: fires are not buffered.
//!
//! Entries live until they are fired. Names that are waited on but never
//! fired stay registered for the registry's lifetime unless removed with
//! [`Registry::evict`] or [`Registry::evict_all`].
//!
//! The thread-local global registry ([`fire`], [`wait`]) is keyed by string
//! and carries values of any `'static + Clone` type.

use crate::deferred::{Deferred, Wait};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, trace};
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

/// A mapping from names to pending values.
///
/// Cloning yields another handle to the same registry.
pub struct Registry<K, V> {
    entries: Rc<RefCell<HashMap<K, Deferred<V>>>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Delivers `value` to every task waiting on `key`.
    ///
    /// With no waiter registered the value is dropped and nothing is
    /// reported to the caller.
    pub fn fire<Q>(&self, key: &Q, value: V)
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let pending = self.entries.borrow_mut().remove(key);
        match pending {
            Some(deferred) => {
                trace!(name = ?key, "firing registered waiters");
                let _ = deferred.resolve(value);
            }
            None => debug!(name = ?key, "fire with no waiter; value dropped"),
        }
    }

    /// Returns a future for the next value fired on `key`.
    ///
    /// The registration happens immediately, before the future is polled.
    pub fn wait(&self, key: K) -> Wait<V> {
        let mut entries = self.entries.borrow_mut();
        let deferred = entries.entry(key).or_insert_with(Deferred::new);
        deferred.wait()
    }

    /// Returns true if a waiter is registered for `key`.
    #[must_use]
    pub fn is_waiting<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.borrow().contains_key(key)
    }

    /// Returns the number of names with registered waiters.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Removes the entry for `key`, failing its waiters with
    /// [`ErrorKind::Evicted`]. Returns false if nothing was registered.
    pub fn evict<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let pending = self.entries.borrow_mut().remove(key);
        let Some(deferred) = pending else {
            return false;
        };
        debug!(name = ?key, "registry entry evicted");
        let _ = deferred.fail(
            Error::new(ErrorKind::Evicted).with_message(format!("{key:?} evicted before fire")),
        );
        true
    }

    /// Evicts every entry. Returns how many were removed.
    pub fn evict_all(&self) -> usize {
        let drained: Vec<(K, Deferred<V>)> = self.entries.borrow_mut().drain().collect();
        let count = drained.len();
        for (key, deferred) in drained {
            let _ = deferred.fail(
                Error::new(ErrorKind::Evicted).with_message(format!("{key:?} evicted before fire")),
            );
        }
        if count > 0 {
            debug!(count, "registry cleared");
        }
        count
    }
}

impl<K, V> Clone for Registry<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Registry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.try_borrow() {
            Ok(entries) => f
                .debug_struct("Registry")
                .field("waiting", &entries.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.debug_struct("Registry").finish_non_exhaustive(),
        }
    }
}

// =========================================================================
// Global registry
// =========================================================================

type AnyValue = Rc<dyn Any>;

thread_local! {
    static GLOBAL: Registry<String, AnyValue> = Registry::new();
}

/// Fires `value` on the thread's global registry.
///
/// Waiters expecting another type fail with [`ErrorKind::TypeMismatch`].
pub fn fire<T: 'static>(name: &str, value: T) {
    let value: AnyValue = Rc::new(value);
    GLOBAL.with(|registry| registry.fire(name, value));
}

/// Waits on `name` in the thread's global registry.
///
/// The registration happens immediately, before the future is polled.
pub fn wait<T: Clone + 'static>(name: &str) -> impl Future<Output = Result<T>> {
    let pending = GLOBAL.with(|registry| registry.wait(name.to_owned()));
    let name = name.to_owned();
    async move {
        let value = pending.await?;
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "value fired on {name:?} is not a {}",
                type_name::<T>()
            ))
        })
    }
}

/// Returns true if the global registry has a waiter for `name`.
#[must_use]
pub fn is_waiting(name: &str) -> bool {
    GLOBAL.with(|registry| registry.is_waiting(name))
}

/// Returns the number of names waited on in the global registry.
#[must_use]
pub fn pending_count() -> usize {
    GLOBAL.with(Registry::pending_count)
}

/// Evicts `name` from the global registry.
pub fn evict(name: &str) -> bool {
    GLOBAL.with(|registry| registry.evict(name))
}

/// Evicts every entry of the global registry.
pub fn evict_all() -> usize {
    GLOBAL.with(Registry::evict_all)
}
