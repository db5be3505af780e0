use crate::cancel::{Cancel, Connection};
use crate::error::Aborted;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Outcome = Result<(), Aborted>;

#[derive(Default)]
struct Waiters {
    next_id: u64,
    queue: VecDeque<(u64, oneshot::Sender<Outcome>)>,
}

impl Waiters {
    fn remove(&mut self, id: u64) -> Option<oneshot::Sender<Outcome>> {
        let index = self.queue.iter().position(|(i, _)| *i == id)?;
        self.queue.remove(index).map(|(_, tx)| tx)
    }
}

fn lock(waiters: &Mutex<Waiters>) -> MutexGuard<'_, Waiters> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

fn abort_waiter(waiters: &Mutex<Waiters>, id: u64) {
    let tx = lock(waiters).remove(id);
    if let Some(tx) = tx {
        let _ = tx.send(Err(Aborted));
    }
}

/// A rendezvous point for asynchronous tasks
///
/// Tasks [`wait`](ConditionVariable::wait) on it; a call to
/// [`notify`](ConditionVariable::notify) releases every task waiting at
/// that moment (in the order they started waiting), and later waits
/// are not affected by earlier notifications. There is no "signalled"
/// state, so callers recheck their own condition after every wake-up.
///
/// Dropping the variable releases any remaining waiters with
/// [`Aborted`].
#[derive(Default)]
pub struct ConditionVariable {
    waiters: Arc<Mutex<Waiters>>,
}

impl ConditionVariable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every current waiter successfully
    pub fn notify(&self) {
        self.release_all(Ok(()));
    }

    fn release_all(&self, outcome: Outcome) {
        let queue = std::mem::take(&mut lock(&self.waiters).queue);
        for (_, tx) in queue {
            let _ = tx.send(outcome);
        }
    }

    /// Start waiting for the next notification
    ///
    /// The waiter is registered when this is called, not when the
    /// returned future is first polled: a notification in between is
    /// not lost. If `cancel` fires before then, the wait completes with
    /// [`Aborted`] instead (immediately, if it has already fired).
    pub fn wait(&self, cancel: Option<&Cancel>) -> Wait {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut guard = lock(&self.waiters);
            let id = guard.next_id;
            guard.next_id += 1;
            guard.queue.push_back((id, tx));
            id
        };

        let connection = cancel.map(|cancel| {
            let weak = Arc::downgrade(&self.waiters);
            let connection = cancel.connect(move || {
                if let Some(waiters) = weak.upgrade() {
                    abort_waiter(&waiters, id);
                }
            });
            if cancel.is_fired() {
                abort_waiter(&self.waiters, id);
            }
            connection
        });

        Wait {
            rx,
            id,
            waiters: Arc::downgrade(&self.waiters),
            _connection: connection,
        }
    }

    /// How many tasks are currently waiting
    #[must_use]
    pub fn waiters(&self) -> usize {
        lock(&self.waiters).queue.len()
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        self.release_all(Err(Aborted));
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// A pending wait on a [`ConditionVariable`]
///
/// Dropping it before completion withdraws the waiter.
pub struct Wait {
    rx: oneshot::Receiver<Outcome>,
    id: u64,
    waiters: Weak<Mutex<Waiters>>,
    _connection: Option<Connection>,
}

impl Future for Wait {
    type Output = Result<(), Aborted>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(Aborted)))
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let Some(waiters) = self.waiters.upgrade() {
            lock(&waiters).remove(self.id);
        }
    }
}
