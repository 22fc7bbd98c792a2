//! # Mutex
//!
//! An adaptive, process-private mutex: spin a little, then sleep on a futex.
//!
//! The state is a u32 so it works with `atomic_wait`:
//! - 0 - unlocked
//! - 1 - locked, nobody is waiting
//! - 2 - locked, somebody may be waiting
//!
//! The uncontended path is a single compare-exchange for lock and a single swap for unlock,
//! neither touches the kernel. A wake syscall is only issued if the state says there might be a sleeper.
//!
//! Critical sections in the transport are usually short, so before sleeping the contended path
//! spins for up to [ADAPTIVE_SPIN_COUNT] rounds while the lock is held by a running thread.
//! There's no point in spinning on a uniprocessor, the owner can't run while we spin => no spinning there at all.
//!
//! The mutex isn't reentrant: locking it twice from the same thread deadlocks.

use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

use crate::context::CONTEXT;

/// How many times the contended path looks at the lock before going to sleep.
///
/// Same figure as glibc's adaptive mutexes.
pub const ADAPTIVE_SPIN_COUNT: u32 = 200;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub struct Mutex<Y> {
    state: AtomicU32,
    value: UnsafeCell<Y>,
}

/// It's safe to share if the value is safe to send: only one thread touches it at a time.
unsafe impl<Y> Sync for Mutex<Y> where Y: Send {}

impl<Y> Mutex<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    /// Block until the calling thread is the sole owner.
    pub fn lock(&self) -> MutexGuard<'_, Y> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            Self::lock_contended(&self.state);
        }
        MutexGuard::new(self)
    }

    /// Take the lock only if that doesn't require waiting.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Y>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| MutexGuard::new(self))
    }

    /// Spin for a while, then fall back to the futex.
    #[cold]
    fn lock_contended(state: &AtomicU32) {
        let spins = if CONTEXT.is_smp() {
            ADAPTIVE_SPIN_COUNT
        } else {
            0
        };

        // load, not compare-exchange: a failing CAS still takes the cache line exclusively.
        // Only 1 is worth spinning on, 2 means somebody else already gave up and sleeps.
        let mut spin_count = 0;
        while state.load(Relaxed) == LOCKED && spin_count < spins {
            spin_count += 1;
            std::hint::spin_loop();
        }

        if state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        // leaves the state at 2 so the sleepers behind us aren't forgotten
        while state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(state, CONTENDED);
        }
    }

    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }

    /// Peek at the state without taking the lock. Good for assertions only.
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }
}

impl<Y: Default> Default for Mutex<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

impl<Y> fmt::Debug for Mutex<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof of ownership. Dropping it is the only way to unlock, so only the owner can unlock.
/// The guard is `!Send`: the unlock has to happen on the locking thread.
pub struct MutexGuard<'a, Y> {
    pub(crate) mutex: &'a Mutex<Y>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Y> MutexGuard<'a, Y> {
    fn new(mutex: &'a Mutex<Y>) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }
}

unsafe impl<Y> Sync for MutexGuard<'_, Y> where Y: Sync {}

impl<Y> Deref for MutexGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists => the lock is ours
        unsafe { &*self.mutex.value.get() }
    }
}

impl<Y> DerefMut for MutexGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists => the lock is ours
        unsafe { &mut *self.mutex.value.get() }
    }
}

/// Wake a thread only if someone switched the state to 2.
/// Nothing guarantees the woken thread gets the lock, a spinning one may be faster.
impl<Y> Drop for MutexGuard<'_, Y> {
    fn drop(&mut self) {
        if self.mutex.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.mutex.state);
        }
    }
}

impl<Y: fmt::Debug> fmt::Debug for MutexGuard<'_, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering::SeqCst},
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;
    use crate::util::test::assert_send_sync;

    #[test]
    fn is_send_sync() {
        assert_send_sync::<Mutex<Vec<u8>>>();
    }

    #[test]
    fn counter_never_exceeds_one() {
        let mutex = Mutex::new(0u64);
        let inside = AtomicUsize::new(0);

        scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5_000 {
                        let mut g = mutex.lock();
                        assert_eq!(inside.fetch_add(1, SeqCst), 0);
                        *g += 1;
                        assert_eq!(inside.fetch_sub(1, SeqCst), 1);
                    }
                });
            }
        });

        assert_eq!(mutex.into_inner(), 40_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Mutex::new(());
        let g = mutex.lock();
        assert!(mutex.try_lock().is_none());
        assert!(mutex.is_locked());
        drop(g);
        assert!(mutex.try_lock().is_some());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn sleeper_is_woken() {
        let mutex = Mutex::new(Vec::new());

        scope(|s| {
            let mut g = mutex.lock();
            s.spawn(|| mutex.lock().push(2));
            // long enough for the other thread to give up spinning and sleep
            sleep(Duration::from_millis(50));
            g.push(1);
        });

        assert_eq!(mutex.into_inner(), [1, 2]);
    }
}
