use std::{hint, thread};

use crate::context::CONTEXT;

/// An [exponential backoff] for spin loops.
///
/// Every call to [`Backoff::spin`] issues `2^exp` spin-loop hints and bumps
/// `exp` up to a maximum. On a uniprocessor there is nobody running who could
/// release the lock while we spin, so the backoff yields the thread instead.
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
#[derive(Debug, Copy, Clone)]
pub struct Backoff {
    exp: u8,
    max: u8,
    smp: bool,
}

impl Backoff {
    /// The default maximum exponent (2^8 spins).
    pub const DEFAULT_MAX_EXPONENT: u8 = 8;

    #[must_use]
    pub fn new() -> Self {
        Self {
            exp: 0,
            max: Self::DEFAULT_MAX_EXPONENT,
            smp: CONTEXT.is_smp(),
        }
    }

    /// # Panics
    /// If `max` is above [`Self::DEFAULT_MAX_EXPONENT`].
    #[must_use]
    pub fn with_max_exponent(max: u8) -> Self {
        assert!(max <= Self::DEFAULT_MAX_EXPONENT);
        Self { max, ..Self::new() }
    }

    #[inline]
    pub fn spin(&mut self) {
        if !self.smp {
            thread::yield_now();
            return;
        }

        for _ in 0..(1u32 << self.exp) {
            hint::spin_loop();
        }

        if self.exp < self.max {
            self.exp += 1;
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exponent_saturates_at_max() {
        let mut boff = Backoff::with_max_exponent(3);
        boff.smp = true;
        for _ in 0..10 {
            boff.spin();
        }
        assert_eq!(boff.exp, 3);
    }

    #[test]
    fn uniprocessor_does_not_grow() {
        let mut boff = Backoff::new();
        boff.smp = false;
        boff.spin();
        boff.spin();
        assert_eq!(boff.exp, 0);
    }

    #[test]
    #[should_panic]
    fn rejects_large_exponent() {
        let _ = Backoff::with_max_exponent(Backoff::DEFAULT_MAX_EXPONENT + 1);
    }
}
