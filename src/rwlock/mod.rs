//! # Reader-writer lock
//!
//! Two kinds of locking:
//! - exclusive / write - same as a mutex
//! - shared / read - any number at once, none of them may modify
//!
//! Only one kind can be held at a time. The lock is writer-preferring: as soon as a writer asks,
//! new readers queue up behind it, so a steady stream of readers can't starve the writers.
//!
//! The algorithm lives in a [RawRwLock] implementation, [RwLock] adds the data and the guards:
//! - [futex::FutexRawRwLock] - one atomic state word with futex waits
//! - [emulated::EmulatedRawRwLock] - counters behind a private mutex plus two condition variables
//!
//! [DefaultRawRwLock] is the futex one on Linux and the emulated one elsewhere (or with the `emulated` feature).
//!
//! Not reentrant: read-locking twice from one thread deadlocks if a writer shows up in between.

use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

pub mod emulated;
pub mod futex;

native! {
    pub type DefaultRawRwLock = futex::FutexRawRwLock;
}
emulated! {
    pub type DefaultRawRwLock = emulated::EmulatedRawRwLock;
}

/// The locking protocol without the data.
///
/// # Safety
/// Implementations must give mutual exclusion between a writer and anybody else, and must not let
/// a reader in while a writer waits.
pub unsafe trait RawRwLock {
    /// Block until a shared lock is held.
    fn reader_lock(&self);

    /// Take a shared lock if no writer holds or waits for the lock.
    fn reader_trylock(&self) -> bool;

    /// # Safety
    /// The caller must hold a shared lock.
    unsafe fn reader_unlock(&self);

    /// Block until the exclusive lock is held.
    fn writer_lock(&self);

    /// Take the exclusive lock if it's free of readers and writers.
    fn writer_trylock(&self) -> bool;

    /// # Safety
    /// The caller must hold the exclusive lock.
    unsafe fn writer_unlock(&self);
}

pub struct RwLock<Y, R = DefaultRawRwLock> {
    raw: R,
    value: UnsafeCell<Y>,
}

/// Readers on several threads hold `&Y` at once => Y must be Sync as well as Send.
unsafe impl<Y, R> Sync for RwLock<Y, R>
where
    Y: Send + Sync,
    R: RawRwLock + Sync,
{
}

impl<Y> RwLock<Y> {
    pub fn new(value: Y) -> Self {
        Self::with_raw(value, DefaultRawRwLock::new())
    }
}

impl<Y, R: RawRwLock> RwLock<Y, R> {
    /// A lock on top of a specific backend.
    pub const fn with_raw(value: Y, raw: R) -> Self {
        Self {
            raw,
            value: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, Y, R> {
        self.raw.reader_lock();
        ReadGuard::new(self)
    }

    pub fn try_read(&self) -> Option<ReadGuard<'_, Y, R>> {
        self.raw.reader_trylock().then(|| ReadGuard::new(self))
    }

    pub fn write(&self) -> WriteGuard<'_, Y, R> {
        self.raw.writer_lock();
        WriteGuard::new(self)
    }

    pub fn try_write(&self) -> Option<WriteGuard<'_, Y, R>> {
        self.raw.writer_trylock().then(|| WriteGuard::new(self))
    }

    pub fn raw(&self) -> &R {
        &self.raw
    }

    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y: Default> Default for RwLock<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

impl<Y, R: fmt::Debug> fmt::Debug for RwLock<Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

pub struct ReadGuard<'a, Y, R: RawRwLock = DefaultRawRwLock> {
    lock: &'a RwLock<Y, R>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Y, R: RawRwLock> ReadGuard<'a, Y, R> {
    fn new(lock: &'a RwLock<Y, R>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

unsafe impl<Y: Sync, R: RawRwLock + Sync> Sync for ReadGuard<'_, Y, R> {}

/// A read guard only gives out `&Y`.
impl<Y, R: RawRwLock> Deref for ReadGuard<'_, Y, R> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: shared lock held => nobody writes
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y, R: RawRwLock> Drop for ReadGuard<'_, Y, R> {
    fn drop(&mut self) {
        // SAFETY: the guard is the shared lock
        unsafe { self.lock.raw.reader_unlock() }
    }
}

pub struct WriteGuard<'a, Y, R: RawRwLock = DefaultRawRwLock> {
    lock: &'a RwLock<Y, R>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Y, R: RawRwLock> WriteGuard<'a, Y, R> {
    fn new(lock: &'a RwLock<Y, R>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

unsafe impl<Y: Sync, R: RawRwLock + Sync> Sync for WriteGuard<'_, Y, R> {}

impl<Y, R: RawRwLock> Deref for WriteGuard<'_, Y, R> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: exclusive lock held
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y, R: RawRwLock> DerefMut for WriteGuard<'_, Y, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: exclusive lock held
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y, R: RawRwLock> Drop for WriteGuard<'_, Y, R> {
    fn drop(&mut self) {
        // SAFETY: the guard is the exclusive lock
        unsafe { self.lock.raw.writer_unlock() }
    }
}
