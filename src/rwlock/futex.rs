//! # Futex reader-writer lock
//!
//! All in one u32 `state`:
//! - `u32::MAX` - write locked
//! - otherwise `2 * readers`, plus 1 if a writer is waiting
//!
//! So an odd state means "no new readers", which is what gives writers their priority:
//! a waiting writer sets the low bit and the readers already inside drain out.
//!
//! Writers don't sleep on `state` (it changes with every reader) but on `writer_wake_counter`,
//! bumped whenever a writer might be able to go. Readers sleep on `state` itself.
//!
//! The bit can't be set while a writer holds the lock (`u32::MAX` is odd already), so writers queued
//! behind a writer are counted in `writers_waiting`. A writer unlocking with others still queued
//! leaves the state at 1: unlocked, but closed to readers.

use std::{
    fmt,
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release, SeqCst},
    },
};

use atomic_wait::{wait, wake_all, wake_one};

use super::RawRwLock;

const WRITE_LOCKED: u32 = u32::MAX;

pub struct FutexRawRwLock {
    state: AtomicU32,
    writer_wake_counter: AtomicU32,
    /// Writers inside `writer_lock` that don't hold the lock yet.
    writers_waiting: AtomicU32,
}

impl FutexRawRwLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            writer_wake_counter: AtomicU32::new(0),
            writers_waiting: AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    pub(super) fn pending_writers(&self) -> u32 {
        self.writers_waiting.load(SeqCst)
    }
}

impl Default for FutexRawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawRwLock for FutexRawRwLock {
    fn reader_lock(&self) {
        let mut s = self.state.load(Relaxed);
        loop {
            if s % 2 == 0 {
                // don't let MAX - 1 readers turn into a write lock
                assert!(s < u32::MAX - 2, "too many readers");
                match self.state.compare_exchange_weak(s, s + 2, Acquire, Relaxed) {
                    Ok(_) => return,
                    Err(e) => s = e,
                }
            }
            if s % 2 == 1 {
                // a writer holds or waits for the lock
                wait(&self.state, s);
                s = self.state.load(Relaxed);
            }
        }
    }

    fn reader_trylock(&self) -> bool {
        let mut s = self.state.load(Relaxed);
        while s % 2 == 0 {
            assert!(s < u32::MAX - 2, "too many readers");
            match self.state.compare_exchange_weak(s, s + 2, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(e) => s = e,
            }
        }
        false
    }

    unsafe fn reader_unlock(&self) {
        // 3 -> 1: we were the last reader and a writer is waiting
        if self.state.fetch_sub(2, Release) == 3 {
            self.writer_wake_counter.fetch_add(1, Release);
            wake_one(&self.writer_wake_counter);
        }
    }

    fn writer_lock(&self) {
        // SeqCst pairs with the load in writer_unlock: either it sees us, or we see its unlock
        self.writers_waiting.fetch_add(1, SeqCst);
        let mut s = self.state.load(Relaxed);
        loop {
            // no readers => try to take it, the waiting bit included
            if s <= 1 {
                match self.state.compare_exchange(s, WRITE_LOCKED, Acquire, Relaxed) {
                    Ok(_) => {
                        self.writers_waiting.fetch_sub(1, Relaxed);
                        return;
                    }
                    Err(e) => {
                        s = e;
                        continue;
                    }
                }
            }

            // readers inside => stop new ones from coming in
            if s % 2 == 0 {
                if let Err(e) = self.state.compare_exchange(s, s + 1, Relaxed, Relaxed) {
                    s = e;
                    continue;
                }
            }

            // still locked => sleep until an unlock bumps the counter
            let w = self.writer_wake_counter.load(Acquire);
            s = self.state.load(Relaxed);
            if s >= 2 {
                wait(&self.writer_wake_counter, w);
                s = self.state.load(Relaxed);
            }
        }
    }

    fn writer_trylock(&self) -> bool {
        let s = self.state.load(Relaxed);
        s <= 1
            && self
                .state
                .compare_exchange(s, WRITE_LOCKED, Acquire, Relaxed)
                .is_ok()
    }

    unsafe fn writer_unlock(&self) {
        if self.writers_waiting.load(SeqCst) > 0 {
            // hand over to the next writer, readers stay out
            self.state.store(1, Release);
            self.writer_wake_counter.fetch_add(1, Release);
            wake_one(&self.writer_wake_counter);
        } else {
            self.state.store(0, Release);
            self.writer_wake_counter.fetch_add(1, Release);
            wake_one(&self.writer_wake_counter);
            wake_all(&self.state);
        }
    }
}

impl fmt::Debug for FutexRawRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.load(Relaxed);
        f.debug_struct("FutexRawRwLock")
            .field("write_locked", &(s == WRITE_LOCKED))
            .field("readers", &if s == WRITE_LOCKED { 0 } else { s / 2 })
            .field("writers_waiting", &self.writers_waiting.load(Relaxed))
            .finish()
    }
}
