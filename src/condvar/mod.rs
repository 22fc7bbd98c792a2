//! # Condition variable
//!
//! `wait` unlocks the caller's mutex, sleeps until notified, then locks the mutex again.
//! `signal` wakes one waiter, `broadcast` wakes all of them.
//!
//! As with any condvar, a return from `wait` doesn't mean the condition holds: re-check it,
//! or use [Condvar::wait_while] which does the loop for you.
//!
//! There are two backends behind the [RawCondvar] trait:
//! - [futex::FutexCondvar] (Linux) - a notification counter the waiters sleep on. Wake order is up to the kernel.
//! - [emulated::EmulatedCondvar] - a FIFO queue of per-thread [WaitHandle]s. Needs nothing but a lock
//!   and a way to park a thread, and wakes strictly in arrival order.
//!
//! [Condvar] uses the futex one on Linux and the emulated one everywhere else,
//! or everywhere with the `emulated` feature. Both types are public, so either can be used directly.

use std::time::Duration;

use crate::mutex::MutexGuard;

pub mod emulated;
mod handle;
linux! {
    pub mod futex;
}

pub use self::handle::WaitHandle;

native! {
    type Imp = futex::FutexCondvar;
}
emulated! {
    type Imp = emulated::EmulatedCondvar;
}

/// What a condition variable backend has to provide.
pub trait RawCondvar {
    /// Unlock, sleep until notified, lock again.
    fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> MutexGuard<'a, Y>;

    /// Same as [RawCondvar::wait], but give up after `timeout`.
    fn wait_timeout<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        timeout: Duration,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult);

    /// Wake a single waiter, if there is one.
    fn signal(&self);

    /// Wake everybody waiting right now.
    fn broadcast(&self);
}

/// Whether a timed wait came back because the time was up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult(pub(crate) bool);

impl WaitTimeoutResult {
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

/// The condition variable with the backend picked for this build.
#[derive(Debug)]
pub struct Condvar {
    inner: Imp,
}

impl Condvar {
    pub const fn new() -> Self {
        Self { inner: Imp::new() }
    }

    pub fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> MutexGuard<'a, Y> {
        self.inner.wait(guard)
    }

    /// Wait for as long as `condition` returns true.
    pub fn wait_while<'a, Y, F>(
        &self,
        mut guard: MutexGuard<'a, Y>,
        mut condition: F,
    ) -> MutexGuard<'a, Y>
    where
        F: FnMut(&mut Y) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.inner.wait(guard);
        }
        guard
    }

    pub fn wait_timeout<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        timeout: Duration,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult) {
        self.inner.wait_timeout(guard, timeout)
    }

    pub fn signal(&self) {
        self.inner.signal()
    }

    pub fn broadcast(&self) {
        self.inner.broadcast()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
