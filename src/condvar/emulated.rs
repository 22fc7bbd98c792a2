//! # Emulated condition variable
//!
//! For platforms with a lock and a way to park a thread, but no condition variable.
//!
//! Every thread owns one [WaitHandle], created on its first wait and cached in the [Context] registry.
//! The condvar is just a FIFO queue of the handles of the threads currently waiting, behind a private lock.
//!
//! - `wait` - push our handle while still holding the caller's mutex, unlock it, block on the handle, lock it again
//! - `signal` - pop the oldest handle and set it
//! - `broadcast` - set every queued handle and empty the queue
//!
//! Pushing before the caller's mutex is released is what makes the wait atomic w.r.t. notifications:
//! anybody who changes the state under that mutex and then notifies will find us in the queue.
//!
//! The handles are set while the queue lock is held. A waiter that timed out takes the same lock to remove
//! itself, so if it can't find itself in the queue it knows the signal has been delivered already.

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use super::{RawCondvar, WaitHandle, WaitTimeoutResult};
use crate::{
    context::{Context, CONTEXT},
    mutex::{Mutex, MutexGuard},
};

pub struct EmulatedCondvar {
    waiters: Mutex<VecDeque<Arc<WaitHandle>>>,
    context: &'static Context,
}

impl EmulatedCondvar {
    pub const fn new() -> Self {
        Self::with_context(&CONTEXT)
    }

    /// A condvar drawing its wait handles from `context` rather than the process-wide one.
    pub const fn with_context(context: &'static Context) -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
            context,
        }
    }

    /// How many threads are queued right now.
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Queue the calling thread. The caller's mutex must still be held.
    fn enqueue(&self) -> Arc<WaitHandle> {
        let handle = self.context.wait_handle();
        debug_assert!(!handle.is_set(), "wait handle left signaled by a previous wait");
        self.waiters.lock().push_back(Arc::clone(&handle));
        handle
    }

    /// Take `handle` out of the queue after a timeout.
    /// `true` if it was still there, `false` if a notification got to it first.
    fn dequeue(&self, handle: &Arc<WaitHandle>) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|h| Arc::ptr_eq(h, handle)) {
            Some(i) => {
                waiters.remove(i);
                true
            }
            None => {
                // set under the queue lock => it's visible by now; consume it so the next wait starts clean
                let taken = handle.try_take();
                debug_assert!(taken, "waiter missing from the queue but not signaled");
                false
            }
        }
    }
}

impl RawCondvar for EmulatedCondvar {
    fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> MutexGuard<'a, Y> {
        let handle = self.enqueue();

        let mutex = guard.mutex;
        drop(guard);

        handle.wait();

        mutex.lock()
    }

    fn wait_timeout<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        timeout: Duration,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult) {
        let handle = self.enqueue();

        let mutex = guard.mutex;
        drop(guard);

        let timed_out = !handle.wait_timeout(timeout) && self.dequeue(&handle);

        (mutex.lock(), WaitTimeoutResult(timed_out))
    }

    fn signal(&self) {
        let mut waiters = self.waiters.lock();
        if let Some(handle) = waiters.pop_front() {
            handle.set();
        }
    }

    fn broadcast(&self) {
        let mut waiters = self.waiters.lock();
        for handle in waiters.drain(..) {
            handle.set();
        }
    }
}

impl Default for EmulatedCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EmulatedCondvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedCondvar")
            .field("waiters", &self.waiters())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering::SeqCst},
        thread::{self, scope},
    };

    use super::*;
    use crate::util::test::trace_init;

    #[test]
    fn signal_wakes_in_arrival_order() {
        let _trace = trace_init();
        let _ctx = CONTEXT.acquire();
        let woken = Mutex::new(Vec::new());
        let condvar = EmulatedCondvar::new();

        scope(|s| {
            for name in ["A", "B", "C"] {
                let queued = condvar.waiters() + 1;
                let (woken, condvar) = (&woken, &condvar);
                s.spawn(move || {
                    let g = woken.lock();
                    let mut g = condvar.wait(g);
                    g.push(name);
                });
                // don't let the next one in before this one is queued
                while condvar.waiters() < queued {
                    thread::yield_now();
                }
            }

            for n in 1..=3 {
                condvar.signal();
                while woken.lock().len() < n {
                    thread::yield_now();
                }
            }
        });

        assert_eq!(woken.into_inner(), ["A", "B", "C"]);
        assert_eq!(condvar.waiters(), 0);
    }

    #[test]
    fn broadcast_wakes_everybody() {
        let _ctx = CONTEXT.acquire();
        let mutex = Mutex::new(false);
        let condvar = EmulatedCondvar::new();
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
            while condvar.waiters() < 8 {
                thread::yield_now();
            }

            *mutex.lock() = true;
            condvar.broadcast();
            assert_eq!(condvar.waiters(), 0);
        });

        assert_eq!(done.load(SeqCst), 8);
    }

    #[test]
    fn broadcast_skips_later_arrivals() {
        let _ctx = CONTEXT.acquire();
        let mutex = Mutex::new(());
        let condvar = EmulatedCondvar::new();

        scope(|s| {
            s.spawn(|| drop(condvar.wait(mutex.lock())));
            while condvar.waiters() < 1 {
                thread::yield_now();
            }
            condvar.broadcast();
        });

        // nobody arrived after the broadcast => nobody left behind, and a fresh waiter times out
        let (_g, res) = condvar.wait_timeout(mutex.lock(), Duration::from_millis(10));
        assert!(res.timed_out());
    }

    #[test]
    fn timeout_leaves_the_queue() {
        let _ctx = CONTEXT.acquire();
        let mutex = Mutex::new(());
        let condvar = EmulatedCondvar::new();

        let (g, res) = condvar.wait_timeout(mutex.lock(), Duration::from_millis(20));
        assert!(res.timed_out());
        assert_eq!(condvar.waiters(), 0);
        drop(g);

        // the handle is clean: the next wait really waits
        let handle = CONTEXT.wait_handle();
        assert!(!handle.is_set());
    }

    #[test]
    fn timed_wait_can_be_signaled() {
        let _ctx = CONTEXT.acquire();
        let mutex = Mutex::new(false);
        let condvar = EmulatedCondvar::new();

        scope(|s| {
            s.spawn(|| {
                while condvar.waiters() < 1 {
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
    fn own_context() {
        static CTX: Context = Context::new();
        let _ctx = CTX.acquire();
        let condvar = EmulatedCondvar::with_context(&CTX);
        let mutex = Mutex::new(());

        let (_g, res) = condvar.wait_timeout(mutex.lock(), Duration::from_millis(1));
        assert!(res.timed_out());
        assert_eq!(CTX.registered_handles(), 1);
    }
}
