//! Small helpers shared by the primitives.
//!
//! - [`Backoff`]: exponential backoff for spin loops, aware of the SMP flag
//! - `native!` / `emulated!`: pick the condvar and rwlock backend at build time

/// Items that exist only when the native (futex) backends are selected.
///
/// That's Linux without the `emulated` feature.
macro_rules! native {
    ($($item:item)*) => {
        $(
            #[cfg(all(target_os = "linux", not(feature = "emulated")))]
            $item
        )*
    }
}

/// Items that exist only when the emulated backends are selected.
macro_rules! emulated {
    ($($item:item)*) => {
        $(
            #[cfg(not(all(target_os = "linux", not(feature = "emulated"))))]
            $item
        )*
    }
}

/// Items that need the Linux futex syscall directly.
macro_rules! linux {
    ($($item:item)*) => {
        $(
            #[cfg(target_os = "linux")]
            $item
        )*
    }
}

mod backoff;

pub use self::backoff::Backoff;
