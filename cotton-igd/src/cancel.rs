//! Hierarchical cancellation signals
//!
//! A [`Cancel`] is fired by its owner; everything connected to it at
//! that moment is invoked once, in the order it was connected, and
//! then forgotten. Child tokens fire when their parent does (but not
//! vice versa), which lets a long-lived object (such as an
//! [`Igd`](crate::Igd)) abort every operation it has in flight.
//!
//! ```
//! use cotton_igd::Cancel;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let parent = Cancel::new();
//! let child = Cancel::child_of(&parent);
//! let flag = Arc::new(AtomicBool::new(false));
//! let f2 = flag.clone();
//! let _c = child.connect(move || f2.store(true, Ordering::SeqCst));
//!
//! parent.fire();
//! assert!(flag.load(Ordering::SeqCst));
//! assert!(child.is_fired());
//! ```
use slotmap::SlotMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;

slotmap::new_key_type! { struct ConnectionKey; }

type Slot = Box<dyn FnOnce() + Send>;

struct Registration {
    sequence: u64,
    slot: Slot,
    call_count: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Inner {
    connections: SlotMap<ConnectionKey, Registration>,
    next_sequence: u64,
    call_count: usize,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fire(inner: &Mutex<Inner>) {
    let mut registrations = {
        let mut guard = lock(inner);
        guard.call_count += 1;
        guard
            .connections
            .drain()
            .map(|(_, r)| r)
            .collect::<Vec<_>>()
    };
    registrations.sort_by_key(|r| r.sequence);

    for r in registrations {
        r.call_count.fetch_add(1, Ordering::SeqCst);
        // A cancellation handler that panics leaves its operation in an
        // unknown state; there is no sensible way to carry on.
        if panic::catch_unwind(AssertUnwindSafe(r.slot)).is_err() {
            std::process::abort();
        }
    }
}

/// A cancellation token
///
/// Only the owner fires a token; anyone holding a reference may
/// [`connect`](Cancel::connect) to it. Firing more than once is
/// harmless: the count goes up, but nothing is invoked a second time,
/// because connections are consumed by the first firing.
pub struct Cancel {
    inner: Arc<Mutex<Inner>>,
    _parent: Option<Connection>,
}

impl Cancel {
    /// Create a new, unfired, root token
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            _parent: None,
        }
    }

    /// Create a token which fires whenever `parent` does
    ///
    /// If `parent` has already fired, the child fires immediately
    /// (exactly once). Dropping the child detaches it from the parent.
    #[must_use]
    pub fn child_of(parent: &Cancel) -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let weak = Arc::downgrade(&inner);
        let connection = parent.connect(move || {
            if let Some(inner) = weak.upgrade() {
                fire(&inner);
            }
        });
        let child = Self {
            inner,
            _parent: Some(connection),
        };
        if parent.is_fired() && !child.is_fired() {
            child.fire();
        }
        child
    }

    /// Fire the token, invoking (and removing) every connected callback
    ///
    /// # Panics
    ///
    /// Does not panic, but if a callback panics the process is aborted.
    pub fn fire(&self) {
        fire(&self.inner);
    }

    /// How many times the token has been fired
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.inner).call_count
    }

    /// Has the token been fired at least once?
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.call_count() > 0
    }

    /// How many callbacks are currently connected
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).connections.len()
    }

    /// Are no callbacks currently connected?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connect a callback, to be invoked when the token next fires
    ///
    /// The callback stays connected until it is invoked or the returned
    /// [`Connection`] is dropped, whichever comes first.
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: FnOnce() + Send + 'static,
    {
        let call_count = Arc::new(AtomicUsize::new(0));
        let mut guard = lock(&self.inner);
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        let key = guard.connections.insert(Registration {
            sequence,
            slot: Box::new(slot),
            call_count: call_count.clone(),
        });
        Connection {
            token: Arc::downgrade(&self.inner),
            key,
            call_count,
        }
    }

    /// Wait until the token has been fired
    ///
    /// Completes immediately if it already has.
    pub async fn cancelled(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        let _connection = self.connect(move || {
            let _ = tx.send(());
        });
        if self.is_fired() {
            return;
        }
        let _ = rx.await;
    }
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = lock(&self.inner);
        f.debug_struct("Cancel")
            .field("call_count", &guard.call_count)
            .field("connections", &guard.connections.len())
            .finish()
    }
}

/// A callback's registration with a [`Cancel`] token
///
/// Dropping it disconnects the callback, if it has not yet been called.
pub struct Connection {
    token: Weak<Mutex<Inner>>,
    key: ConnectionKey,
    call_count: Arc<AtomicUsize>,
}

impl Connection {
    /// How many times this connection's callback has been invoked (0 or 1)
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Has this connection's callback been invoked?
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.call_count() > 0
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(inner) = self.token.upgrade() {
            // The callback is dropped outside the lock
            let _removed = lock(&inner).connections.remove(self.key);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("call_count", &self.call_count())
            .finish()
    }
}
