//! Small end-to-end runs of each primitive, driven by the `pgm-sync` binary.
//!
//! Every scenario takes the context for as long as it runs.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
    thread::{self, scope},
    time::{Duration, Instant},
};

use crate::{
    checksum,
    condvar::Condvar,
    config,
    context::CONTEXT,
    mutex::Mutex,
    rwlock::RwLock,
    spinlock::{SpinLock, TicketSpinLock},
};

const THREADS: usize = 4;
const ROUNDS: usize = 100_000;

pub fn mutex() {
    let _ctx = CONTEXT.acquire();
    println!("smp: {}", CONTEXT.is_smp());

    let counter = Mutex::new(0);
    let start = Instant::now();
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    *counter.lock() += 1;
                }
            });
        }
    });
    println!(
        "{THREADS} threads counted to {} in {:?}",
        counter.into_inner(),
        start.elapsed()
    );
}

pub fn spinlock() {
    let _ctx = CONTEXT.acquire();

    let flag = SpinLock::new(0);
    let ticket = TicketSpinLock::new(0);
    let start = Instant::now();
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    *flag.lock() += 1;
                }
            });
        }
    });
    println!(
        "flag spinlock: {} in {:?}",
        flag.into_inner(),
        start.elapsed()
    );

    let start = Instant::now();
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    *ticket.lock() += 1;
                }
            });
        }
    });
    println!(
        "ticket spinlock: {} in {:?}",
        ticket.into_inner(),
        start.elapsed()
    );
}

/// A bounded queue: the producer waits for room, consumers wait for items.
pub fn condvar() {
    let _ctx = CONTEXT.acquire();
    println!("backend: {}", config::BACKEND);

    const ITEMS: usize = 1_000;
    const CAPACITY: usize = 8;

    let queue = Mutex::new(VecDeque::with_capacity(CAPACITY));
    let not_empty = Condvar::new();
    let not_full = Condvar::new();
    let consumed = AtomicUsize::new(0);

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| loop {
                let mut q = not_empty.wait_while(queue.lock(), |q| q.is_empty());
                let item = q.pop_front();
                drop(q);
                not_full.signal();
                match item {
                    Some(Some(_)) => {
                        consumed.fetch_add(1, Relaxed);
                    }
                    // end of stream
                    Some(None) | None => return,
                }
            });
        }

        for i in 0..ITEMS {
            let mut q = not_full.wait_while(queue.lock(), |q| q.len() >= CAPACITY);
            q.push_back(Some(i));
            drop(q);
            not_empty.signal();
        }
        for _ in 0..THREADS {
            let mut q = not_full.wait_while(queue.lock(), |q| q.len() >= CAPACITY);
            q.push_back(None);
            drop(q);
            not_empty.signal();
        }
    });
    println!(
        "{} of {ITEMS} items consumed by {THREADS} threads",
        consumed.load(Relaxed)
    );

    let (_g, res) = not_empty.wait_timeout(queue.lock(), Duration::from_millis(10));
    println!("a wait nobody signals timed out: {}", res.timed_out());
}

/// Readers hold the lock, a writer shows up, readers arriving after it have to wait.
pub fn rwlock() {
    let _ctx = CONTEXT.acquire();
    println!("backend: {}", config::BACKEND);

    let lock = RwLock::new(0u32);
    let log = Mutex::new(Vec::new());

    scope(|s| {
        let first = lock.read();

        s.spawn(|| {
            *lock.write() += 1;
            log.lock().push("writer");
        });
        // the writer is queued once readers are turned away
        while let Some(g) = lock.try_read() {
            drop(g);
            thread::yield_now();
        }

        for _ in 0..THREADS {
            s.spawn(|| {
                let value = *lock.read();
                log.lock().push(if value == 1 {
                    "reader after the write"
                } else {
                    "reader before the write"
                });
            });
        }
        thread::sleep(Duration::from_millis(10));
        drop(first);
    });

    for entry in log.into_inner() {
        println!("{entry}");
    }
}

pub fn checksum() {
    let data = b"PGM reliable multicast";
    let whole = checksum::csum_partial(data, 0);
    let (head, tail) = data.split_at(7);
    let split = checksum::csum_block_add(
        checksum::csum_partial(head, 0),
        checksum::csum_partial(tail, 0),
        head.len(),
    );
    println!("inet checksum: {:#06x}", checksum::inet_checksum(data, 0));
    println!("folded whole: {:#06x}", checksum::csum_fold(whole));
    println!("folded split: {:#06x}", checksum::csum_fold(split));
    println!("send mode: {}", config::send_mode());
}
