//! # Spinlocks
//!
//! Busy-waiting locks for the two-thread case of the transport: the receive thread against the send thread.
//! Nobody sleeps here, a waiter burns its CPU until the owner is done, so critical sections must be tiny.
//!
//! Two flavours:
//! - [SpinLock] - a test-and-set flag. Cheapest, but not fair.
//! - [TicketSpinLock] - a `(head, tail)` ticket pair. Waiters are served in the order they arrived.
//!
//! [DefaultSpinLock] is whichever one the `ticket-spinlock` feature selects.
//!
//! Correctness holds for any number of threads, but the performance contract only covers two contenders.
//! More than that is out of contract rather than an error.

use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicBool, AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use crate::util::Backoff;

#[cfg(not(feature = "ticket-spinlock"))]
pub type DefaultSpinLock<Y> = SpinLock<Y>;
#[cfg(feature = "ticket-spinlock")]
pub type DefaultSpinLock<Y> = TicketSpinLock<Y>;

pub struct SpinLock<Y> {
    locked: AtomicBool,
    value: UnsafeCell<Y>,
}

// UnsafeCell makes the above !Sync, the flag makes it fine again as long as Y is Send
unsafe impl<Y> Sync for SpinLock<Y> where Y: Send {}

impl<Y> SpinLock<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> Guard<'_, Y> {
        let mut boff = Backoff::new();
        // Acquire: the previous owner's writes happen-before ours
        while self
            .locked
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            // spin on a plain load so the cache line stays shared while we wait
            while self.locked.load(Relaxed) {
                boff.spin();
            }
        }
        Guard::new(self)
    }

    pub fn try_lock(&self) -> Option<Guard<'_, Y>> {
        self.locked
            .compare_exchange(false, true, Acquire, Relaxed)
            .ok()
            .map(|_| Guard::new(self))
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y> fmt::Debug for SpinLock<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.locked.load(Relaxed))
            .finish_non_exhaustive()
    }
}

/// `!Send`, and `Sync` only for `Y: Sync`: sharing `&Guard` hands out `&Y` to other threads.
///
/// ```compile_fail
/// fn is_sync<T: Sync>() {}
/// is_sync::<pgm_sync::spinlock::Guard<'static, std::cell::Cell<u32>>>();
/// ```
pub struct Guard<'a, Y> {
    lock: &'a SpinLock<Y>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Y> Guard<'a, Y> {
    fn new(lock: &'a SpinLock<Y>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

unsafe impl<Y> Sync for Guard<'_, Y> where Y: Sync {}

impl<Y> Deref for Guard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard only exists while the flag is ours
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for Guard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard only exists while the flag is ours
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for Guard<'_, Y> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Release);
    }
}

/// Ticket waiters only ever wait for one predecessor at a time, keep the spins short
/// so the turn is noticed soon after it comes.
const TICKET_MAX_EXPONENT: u8 = 4;

/// A fair spinlock.
///
/// `lock` takes the next ticket from `tail` and waits until `head` shows it.
/// `unlock` moves `head` forward by one. Both counters wrap, only their equality matters.
pub struct TicketSpinLock<Y> {
    head: AtomicU32,
    tail: AtomicU32,
    value: UnsafeCell<Y>,
}

unsafe impl<Y> Sync for TicketSpinLock<Y> where Y: Send {}

impl<Y> TicketSpinLock<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> TicketGuard<'_, Y> {
        // the ticket itself doesn't publish anything, the Acquire load of head does
        let ticket = self.tail.fetch_add(1, Relaxed);
        let mut boff = Backoff::with_max_exponent(TICKET_MAX_EXPONENT);
        while self.head.load(Acquire) != ticket {
            boff.spin();
        }
        TicketGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y> fmt::Debug for TicketSpinLock<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSpinLock")
            .field("head", &self.head.load(Relaxed))
            .field("tail", &self.tail.load(Relaxed))
            .finish_non_exhaustive()
    }
}

/// Same rules as [Guard].
///
/// ```compile_fail
/// fn is_sync<T: Sync>() {}
/// is_sync::<pgm_sync::spinlock::TicketGuard<'static, std::cell::Cell<u32>>>();
/// ```
pub struct TicketGuard<'a, Y> {
    lock: &'a TicketSpinLock<Y>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<Y> Sync for TicketGuard<'_, Y> where Y: Sync {}

impl<Y> Deref for TicketGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: head == our ticket until we drop
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for TicketGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: head == our ticket until we drop
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for TicketGuard<'_, Y> {
    fn drop(&mut self) {
        // only the owner writes head => the RMW can't race with another unlock
        self.lock.head.fetch_add(1, Release);
    }
}
