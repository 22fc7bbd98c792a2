//! # Emulated reader-writer lock
//!
//! For platforms without a shared/exclusive lock. Built from the crate's own [Mutex] and [Condvar]:
//! four counters behind a private mutex, readers sleep on `read_cond`, writers on `write_cond`.
//!
//! - `read_counter` - readers inside
//! - `have_writer` - a writer inside
//! - `want_to_read` / `want_to_write` - threads sleeping in `reader_lock` / `writer_lock`
//!
//! A reader waits while a writer is inside *or waiting*, that's the writer priority.
//! A writer waits while anybody is inside.
//!
//! Whenever the lock becomes free, one waiting writer is woken if there is one,
//! otherwise every waiting reader.

use std::fmt;

use crate::{
    condvar::Condvar,
    mutex::{Mutex, MutexGuard},
};

use super::RawRwLock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct State {
    read_counter: u32,
    have_writer: bool,
    want_to_read: u32,
    want_to_write: u32,
}

impl State {
    fn check(&self) {
        debug_assert!(
            !(self.have_writer && self.read_counter > 0),
            "writer and readers inside at the same time: {self:?}"
        );
    }
}

pub struct EmulatedRawRwLock {
    state: Mutex<State>,
    read_cond: Condvar,
    write_cond: Condvar,
}

impl EmulatedRawRwLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                read_counter: 0,
                have_writer: false,
                want_to_read: 0,
                want_to_write: 0,
            }),
            read_cond: Condvar::new(),
            write_cond: Condvar::new(),
        }
    }

    /// Writers first.
    fn wake(&self, state: &State) {
        if state.want_to_write > 0 {
            self.write_cond.signal();
        } else if state.want_to_read > 0 {
            self.read_cond.broadcast();
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> State {
        *self.state.lock()
    }

    #[cfg(test)]
    pub(super) fn pending_writers(&self) -> u32 {
        self.state.lock().want_to_write
    }
}

impl Default for EmulatedRawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawRwLock for EmulatedRawRwLock {
    fn reader_lock(&self) {
        let mut s: MutexGuard<'_, State> = self.state.lock();
        s.want_to_read += 1;
        while s.have_writer || s.want_to_write > 0 {
            s = self.read_cond.wait(s);
        }
        s.want_to_read -= 1;
        s.read_counter += 1;
        s.check();
    }

    fn reader_trylock(&self) -> bool {
        let mut s = self.state.lock();
        if s.have_writer || s.want_to_write > 0 {
            return false;
        }
        s.read_counter += 1;
        s.check();
        true
    }

    unsafe fn reader_unlock(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.read_counter > 0, "reader_unlock without a reader");
        s.read_counter -= 1;
        if s.read_counter == 0 {
            self.wake(&s);
        }
    }

    fn writer_lock(&self) {
        let mut s = self.state.lock();
        s.want_to_write += 1;
        while s.have_writer || s.read_counter > 0 {
            s = self.write_cond.wait(s);
        }
        s.want_to_write -= 1;
        s.have_writer = true;
        s.check();
    }

    fn writer_trylock(&self) -> bool {
        let mut s = self.state.lock();
        if s.have_writer || s.read_counter > 0 {
            return false;
        }
        s.have_writer = true;
        true
    }

    unsafe fn writer_unlock(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.have_writer, "writer_unlock without a writer");
        s.have_writer = false;
        self.wake(&s);
    }
}

impl fmt::Debug for EmulatedRawRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(s) => f
                .debug_struct("EmulatedRawRwLock")
                .field("read_counter", &s.read_counter)
                .field("have_writer", &s.have_writer)
                .field("want_to_read", &s.want_to_read)
                .field("want_to_write", &s.want_to_write)
                .finish(),
            None => f
                .debug_struct("EmulatedRawRwLock")
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread::{self, scope};

    use super::*;
    use crate::{context::CONTEXT, rwlock::RwLock};

    #[test]
    fn counters_follow_the_locks() {
        let _ctx = CONTEXT.acquire();
        let lock = EmulatedRawRwLock::new();

        lock.reader_lock();
        assert!(lock.reader_trylock());
        assert_eq!(lock.snapshot().read_counter, 2);
        assert!(!lock.writer_trylock());
        unsafe {
            lock.reader_unlock();
            lock.reader_unlock();
        }
        assert_eq!(lock.snapshot(), State::default());

        assert!(lock.writer_trylock());
        assert!(lock.snapshot().have_writer);
        assert!(!lock.reader_trylock());
        unsafe { lock.writer_unlock() };
        assert_eq!(lock.snapshot(), State::default());
    }

    #[test]
    fn unlock_prefers_waiting_writer() {
        let _ctx = CONTEXT.acquire();
        let lock = RwLock::with_raw((), EmulatedRawRwLock::new());
        let order = Mutex::new(Vec::new());

        scope(|s| {
            let g = lock.write();

            s.spawn(|| {
                let _g = lock.read();
                order.lock().push("reader");
            });
            while lock.raw().snapshot().want_to_read < 1 {
                thread::yield_now();
            }
            s.spawn(|| {
                let _g = lock.write();
                order.lock().push("writer");
            });
            while lock.raw().snapshot().want_to_write < 1 {
                thread::yield_now();
            }

            // both kinds are waiting: the writer must go first
            drop(g);
        });

        assert_eq!(order.into_inner(), ["writer", "reader"]);
        assert_eq!(lock.raw().snapshot(), State::default());
    }

    #[test]
    fn pending_writer_is_counted() {
        let _ctx = CONTEXT.acquire();
        let lock = RwLock::with_raw((), EmulatedRawRwLock::new());

        scope(|s| {
            let g = lock.read();
            s.spawn(|| drop(lock.write()));
            while lock.raw().snapshot().want_to_write < 1 {
                thread::yield_now();
            }
            let state = lock.raw().snapshot();
            assert_eq!(state.read_counter, 1);
            assert!(!state.have_writer);
            assert!(lock.try_read().is_none());
            drop(g);
        });

        assert_eq!(lock.raw().snapshot(), State::default());
    }
}
