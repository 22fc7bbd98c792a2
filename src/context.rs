//! # Process-wide lifecycle context
//!
//! The primitives share a little process-wide state:
//! - a reference count of `init` calls, the 0 -> 1 and 1 -> 0 transitions do the real work
//! - the SMP flag, tuning how long the locks spin
//! - the registry of per-thread wait handles used by the emulated condition variable
//!
//! It all lives in one [Context] value. [CONTEXT] is the process-lifetime instance used by the
//! primitives, [init](crate::init) and [shutdown](crate::shutdown) forward to it.
//! A separate instance can be created for tests, it just has to be `'static` to hand out wait handles.
//!
//! Call `init` once before using any primitive, and `shutdown` once per `init` when done.
//! Only the last `shutdown` frees the registry.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    num::NonZeroUsize,
    ptr,
    sync::{
        atomic::{
            AtomicBool, AtomicU32,
            Ordering::{AcqRel, Acquire, Relaxed},
        },
        Arc,
    },
    thread::{self, ThreadId},
};

use tracing::{debug, trace, warn};

use crate::{condvar::WaitHandle, mutex::Mutex};

/// The context every primitive in the crate reports to.
pub static CONTEXT: Context = Context::new();

type Registry = HashMap<ThreadId, Arc<WaitHandle>>;

pub struct Context {
    ref_count: AtomicU32,
    smp: AtomicBool,
    registry: Mutex<Option<Registry>>,
}

impl Context {
    /// A context nobody has initialised yet.
    ///
    /// The SMP flag starts as `true` and is only cleared by `init` on a single-processor machine.
    pub const fn new() -> Self {
        Self {
            ref_count: AtomicU32::new(0),
            smp: AtomicBool::new(true),
            registry: Mutex::new(None),
        }
    }

    pub fn init(&self) {
        if self.ref_count.fetch_add(1, AcqRel) > 0 {
            return;
        }

        let nprocs = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        self.smp.store(nprocs > 1, Relaxed);
        self.registry.lock().get_or_insert_with(HashMap::new);
        debug!(nprocs, smp = nprocs > 1, "sync context initialised");
    }

    /// Undo one [Context::init]. A shutdown with nothing to undo is ignored.
    pub fn shutdown(&self) {
        match self
            .ref_count
            .fetch_update(AcqRel, Acquire, |n| n.checked_sub(1))
        {
            Err(_) => warn!("sync context shutdown without a matching init"),
            Ok(1) => {
                let released = self.registry.lock().take().map_or(0, |r| r.len());
                debug!(released, "sync context shut down");
            }
            Ok(_) => {}
        }
    }

    /// `init` now, `shutdown` when the guard goes away.
    pub fn acquire(&self) -> ContextGuard<'_> {
        self.init();
        ContextGuard { context: self }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.lock().is_some()
    }

    /// More than one logical processor?
    pub fn is_smp(&self) -> bool {
        self.smp.load(Relaxed)
    }

    /// Number of threads holding a wait handle right now.
    pub fn registered_handles(&self) -> usize {
        self.registry.lock().as_ref().map_or(0, |r| r.len())
    }

    /// The calling thread's wait handle, created on first use.
    ///
    /// The handle stays cached until the thread exits or the context is shut down.
    pub fn wait_handle(&'static self) -> Arc<WaitHandle> {
        debug_assert!(self.ref_count() > 0, "wait handle requested before init");

        let current = thread::current();
        let id = current.id();
        let handle = {
            let mut registry = self.registry.lock();
            let handles = registry.get_or_insert_with(HashMap::new);
            if let Some(handle) = handles.get(&id) {
                return Arc::clone(handle);
            }
            let handle = Arc::new(WaitHandle::new(current));
            handles.insert(id, Arc::clone(&handle));
            handle
        };

        trace!(thread = ?id, "wait handle created");
        ExitHook::register(self, id);
        handle
    }

    fn release(&self, id: ThreadId) {
        if let Some(handles) = self.registry.lock().as_mut() {
            if handles.remove(&id).is_some() {
                trace!(thread = ?id, "wait handle released");
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("ref_count", &self.ref_count())
            .field("smp", &self.is_smp())
            .field("registered_handles", &self.registered_handles())
            .finish()
    }
}

#[derive(Debug)]
#[must_use = "the context is shut down as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    context: &'a Context,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.shutdown();
    }
}

/// Drops the thread's registry entries when the thread exits.
struct ExitHook {
    context: &'static Context,
    thread: ThreadId,
}

thread_local! {
    static EXIT_HOOKS: RefCell<Vec<ExitHook>> = const { RefCell::new(Vec::new()) };
}

impl ExitHook {
    fn register(context: &'static Context, thread: ThreadId) {
        // fails only while the thread-locals are being torn down, the shutdown will clean up then
        let _ = EXIT_HOOKS.try_with(|hooks| {
            let mut hooks = hooks.borrow_mut();
            if !hooks.iter().any(|h| ptr::eq(h.context, context)) {
                hooks.push(ExitHook { context, thread });
            }
        });
    }
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        self.context.release(self.thread);
    }
}

#[cfg(test)]
mod test {
    use std::thread::scope;

    use super::*;
    use crate::util::test::trace_init;

    #[test]
    fn nested_init_keeps_resources() {
        let _trace = trace_init();
        let ctx = Context::new();
        assert!(!ctx.is_initialized());

        ctx.init();
        ctx.init();
        ctx.init();
        ctx.shutdown();
        ctx.shutdown();
        assert!(ctx.is_initialized());
        assert_eq!(ctx.ref_count(), 1);

        ctx.shutdown();
        assert!(!ctx.is_initialized());
        assert_eq!(ctx.ref_count(), 0);

        // one too many: ignored, no underflow
        ctx.shutdown();
        assert_eq!(ctx.ref_count(), 0);
        assert!(!ctx.is_initialized());
    }

    #[test]
    fn reinit_after_shutdown() {
        let ctx = Context::new();
        drop(ctx.acquire());
        assert!(!ctx.is_initialized());
        let _g = ctx.acquire();
        assert!(ctx.is_initialized());
    }

    #[test]
    fn smp_flag_matches_processors() {
        let ctx = Context::new();
        let _g = ctx.acquire();
        let nprocs = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        assert_eq!(ctx.is_smp(), nprocs > 1);
    }

    #[test]
    fn handle_is_per_thread_and_reused() {
        static CTX: Context = Context::new();
        let _g = CTX.acquire();

        let first = CTX.wait_handle();
        let second = CTX.wait_handle();
        assert!(Arc::ptr_eq(&first, &second));

        let other = scope(|s| s.spawn(|| CTX.wait_handle()).join().unwrap());
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn handle_released_at_thread_exit() {
        static CTX: Context = Context::new();
        let _g = CTX.acquire();

        scope(|s| {
            s.spawn(|| {
                CTX.wait_handle();
                assert_eq!(CTX.registered_handles(), 1);
            });
        });

        assert_eq!(CTX.registered_handles(), 0);
    }

    #[test]
    fn shutdown_releases_handles() {
        static CTX: Context = Context::new();
        let g = CTX.acquire();
        CTX.wait_handle();
        assert_eq!(CTX.registered_handles(), 1);
        drop(g);
        assert_eq!(CTX.registered_handles(), 0);
        assert!(!CTX.is_initialized());
    }
}
