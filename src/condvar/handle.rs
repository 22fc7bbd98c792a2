use std::{
    fmt,
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Relaxed, Release},
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

/// A reusable per-thread auto-reset event.
///
/// Exactly one thread (the owner) ever waits on it; anybody may [set](WaitHandle::set) it.
/// A successful wait consumes the signal, so the handle is ready for the next wait right away.
///
/// Blocking is done with [thread::park], which is available everywhere std is.
/// Park may return spuriously, the flag is what counts.
pub struct WaitHandle {
    owner: Thread,
    signaled: AtomicBool,
}

impl WaitHandle {
    pub(crate) fn new(owner: Thread) -> Self {
        Self {
            owner,
            signaled: AtomicBool::new(false),
        }
    }

    /// Signal the handle and wake its owner.
    pub fn set(&self) {
        // Release: whatever the setter did happens-before the owner's return from wait
        self.signaled.store(true, Release);
        self.owner.unpark();
    }

    /// Block the owner until the handle is set, then reset it.
    pub fn wait(&self) {
        self.debug_assert_owner();
        while !self.signaled.swap(false, Acquire) {
            thread::park();
        }
    }

    /// [WaitHandle::wait] with a limit. `false` if the time ran out first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.debug_assert_owner();
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.signaled.swap(false, Acquire) {
                return true;
            }
            match deadline {
                // too far away to represent => same as forever
                None => thread::park(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    thread::park_timeout(remaining);
                }
            }
        }
    }

    /// Consume a pending signal without blocking.
    pub fn try_take(&self) -> bool {
        self.signaled.swap(false, Acquire)
    }

    pub fn is_set(&self) -> bool {
        self.signaled.load(Relaxed)
    }

    fn debug_assert_owner(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner.id(),
            "wait handle waited on by a thread other than its owner"
        );
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("owner", &self.owner.id())
            .field("signaled", &self.is_set())
            .finish()
    }
}
