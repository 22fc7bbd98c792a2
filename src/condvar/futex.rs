//! # Futex condition variable
//!
//! The futex doesn't lose wakeups on its own, it relies on the atomic it sleeps on.
//! So the atomic is a counter of notifications: a waiter reads it, unlocks the mutex and sleeps
//! only if the counter still has the value it read.
//!
//! Why that's enough: a notification that happened before our unlock can't be about anything we
//! haven't seen yet, the notifier couldn't touch the data. After our unlock, whoever locks the mutex,
//! changes the data and notifies does so after our load => either the wait sees the new counter value and
//! returns right away, or it's already asleep and gets woken.
//!
//! The counter wraps. A waiter that misses exactly 2^32 notifications would sleep through them,
//! that's considered impossible in practice.
//!
//! `num_waiters` lets `signal` and `broadcast` skip the wake syscall when nobody is waiting.
//! It's updated with Relaxed: the mutex orders everything that matters.
//!
//! Wakeup order is whatever the kernel does. Spurious wakeups happen.

use std::{
    fmt, io,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering::Relaxed},
    time::{Duration, Instant},
};

use atomic_wait::{wait, wake_all, wake_one};

use super::{RawCondvar, WaitTimeoutResult};
use crate::{error::fatal, mutex::MutexGuard};

pub struct FutexCondvar {
    counter: AtomicU32,
    num_waiters: AtomicUsize,
}

impl FutexCondvar {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            num_waiters: AtomicUsize::new(0),
        }
    }
}

impl RawCondvar for FutexCondvar {
    fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> MutexGuard<'a, Y> {
        // let the notifiers know before the mutex is released
        self.num_waiters.fetch_add(1, Relaxed);

        let counter_value = self.counter.load(Relaxed);
        let mutex = guard.mutex;
        drop(guard);

        wait(&self.counter, counter_value);

        self.num_waiters.fetch_sub(1, Relaxed);

        mutex.lock()
    }

    fn wait_timeout<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        timeout: Duration,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult) {
        self.num_waiters.fetch_add(1, Relaxed);

        let counter_value = self.counter.load(Relaxed);
        let mutex = guard.mutex;
        drop(guard);

        let deadline = Instant::now().checked_add(timeout);
        let timed_out = loop {
            match deadline {
                // too far away to represent => same as forever
                None => wait(&self.counter, counter_value),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break true;
                    }
                    futex_wait_timeout(&self.counter, counter_value, remaining);
                }
            }
            if self.counter.load(Relaxed) != counter_value {
                break false;
            }
            // timed out for the kernel, interrupted, or spurious: the deadline decides
        };

        self.num_waiters.fetch_sub(1, Relaxed);

        (mutex.lock(), WaitTimeoutResult(timed_out))
    }

    fn signal(&self) {
        if self.num_waiters.load(Relaxed) > 0 {
            self.counter.fetch_add(1, Relaxed);
            wake_one(&self.counter);
        }
    }

    fn broadcast(&self) {
        if self.num_waiters.load(Relaxed) > 0 {
            self.counter.fetch_add(1, Relaxed);
            wake_all(&self.counter);
        }
    }
}

impl Default for FutexCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FutexCondvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutexCondvar")
            .field("counter", &self.counter.load(Relaxed))
            .field("num_waiters", &self.num_waiters.load(Relaxed))
            .finish()
    }
}

/// `atomic_wait` has no timed variant, so this one talks to the kernel directly.
///
/// Returns on a wake, a timeout, a signal, or right away if `atomic != expected`.
/// Anything else means the futex itself is broken => abort.
fn futex_wait_timeout(atomic: &AtomicU32, expected: u32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs().try_into().unwrap_or(libc::time_t::MAX),
        tv_nsec: timeout.subsec_nanos() as _,
    };
    // SAFETY: the address is a live AtomicU32, FUTEX_WAIT only reads it
    let r = unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            &ts as *const libc::timespec,
        )
    };
    if r == -1 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ETIMEDOUT | libc::EAGAIN | libc::EINTR) => {}
            _ => fatal("futex wait", err),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::Ordering::SeqCst,
        thread::{self, scope},
    };

    use super::*;
    use crate::mutex::Mutex;

    #[test]
    fn signal_skips_syscall_without_waiters() {
        let condvar = FutexCondvar::new();
        condvar.signal();
        condvar.broadcast();
        assert_eq!(condvar.counter.load(SeqCst), 0);
    }

    #[test]
    fn broadcast_wakes_everybody() {
        let mutex = Mutex::new(false);
        let condvar = FutexCondvar::new();
        let done = AtomicUsize::new(0);

        scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let mut g = mutex.lock();
                    while !*g {
                        g = condvar.wait(g);
                    }
                    done.fetch_add(1, SeqCst);
                });
            }
            while condvar.num_waiters.load(SeqCst) < 8 {
                thread::yield_now();
            }

            *mutex.lock() = true;
            condvar.broadcast();
        });

        assert_eq!(done.load(SeqCst), 8);
        assert_eq!(condvar.num_waiters.load(SeqCst), 0);
    }

    #[test]
    fn timed_wait_returns_on_notification() {
        let mutex = Mutex::new(false);
        let condvar = FutexCondvar::new();

        scope(|s| {
            s.spawn(|| {
                while condvar.num_waiters.load(SeqCst) < 1 {
                    thread::yield_now();
                }
                *mutex.lock() = true;
                condvar.signal();
            });

            let mut g = mutex.lock();
            while !*g {
                let (next, res) = condvar.wait_timeout(g, Duration::from_secs(10));
                assert!(!res.timed_out());
                g = next;
            }
        });
    }

    #[test]
    fn timed_wait_expires() {
        let mutex = Mutex::new(());
        let condvar = FutexCondvar::new();
        let start = Instant::now();
        let (_g, res) = condvar.wait_timeout(mutex.lock(), Duration::from_millis(30));
        assert!(res.timed_out());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
