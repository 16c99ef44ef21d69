//! Mutex-guarded state that waiters can block or await on.
//!
//! Every mutation goes through [`Watched::update`], which wakes both blocking
//! waiters (condition variable) and async waiters (`tokio::sync::Notify`).
//! Waiters never hold the lock while suspended, and every wait is bounded by
//! the poll interval so a predicate is re-checked even if a wake-up is lost.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub(crate) struct Watched<S> {
    state: Mutex<S>,
    changed: Condvar,
    notify: Notify,
}

impl<S> Watched<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
            notify: Notify::new(),
        }
    }

    // A panic in another test thread must not wedge the harness.
    fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }

    /// Mutate the state and wake all waiters.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = {
            let mut guard = self.lock();
            f(&mut guard)
        };
        self.changed.notify_all();
        self.notify.notify_waiters();
        result
    }

    /// Block until `done` holds or `timeout` elapses.
    ///
    /// The predicate is always evaluated at least once, and once more after
    /// the deadline, so the result reflects the final check.
    pub(crate) fn wait_until(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        mut done: impl FnMut(&S) -> bool,
    ) -> bool {
        // An unrepresentable deadline means wait without bound.
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.lock();
        loop {
            if done(&guard) {
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(poll_interval)
                }
                None => poll_interval,
            };
            guard = match self.changed.wait_timeout(guard, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Async counterpart of [`Watched::wait_until`] for tokio tests.
    pub(crate) async fn wait_until_async(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        mut done: impl FnMut(&S) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            // Register interest before checking so an update between the
            // check and the select is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.read(&mut done) {
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(poll_interval)
                }
                None => poll_interval,
            };
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}
