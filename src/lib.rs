//! # pgm-sync
//!
//! Thread synchronization for a reliable multicast transport:
//! - [Mutex] - adaptive, spins a little on SMP machines, then sleeps
//! - [SpinLock] / [TicketSpinLock] - for critical sections of a few instructions
//! - [Condvar] - `signal` / `broadcast` / `wait`, FIFO wake order with the emulated backend
//! - [RwLock] - writer-preferring reader-writer lock
//!
//! The primitives share a process-wide [Context] ([CONTEXT]), reference counted through [init] and [shutdown].
//! Call [init] before the first lock is used and [shutdown] once per [init] at the end.
//!
//! Condition variables and reader-writer locks come with two backends each: futex on Linux,
//! emulated on everything else. The `emulated` feature forces the emulated ones on Linux too.

#[macro_use]
mod util;

pub mod checksum;
pub mod condvar;
pub mod config;
pub mod context;
pub mod demo;
pub mod error;
pub mod mutex;
pub mod rwlock;
pub mod spinlock;

pub use self::{
    condvar::Condvar,
    context::{Context, CONTEXT},
    mutex::{Mutex, MutexGuard},
    rwlock::RwLock,
    spinlock::{SpinLock, TicketSpinLock},
    util::Backoff,
};

/// Take a reference on [CONTEXT]. The first one sets it up.
pub fn init() {
    CONTEXT.init();
}

/// Drop a reference on [CONTEXT]. The last one frees the per-thread wait handles.
pub fn shutdown() {
    CONTEXT.shutdown();
}

/// Whether [CONTEXT] found more than one processor.
pub fn is_smp() -> bool {
    CONTEXT.is_smp()
}
