//! Thread execution-state capabilities.
//!
//! Two execution states are load-bearing preconditions for every bridge
//! operation:
//!
//! - *safe-to-allocate*: the thread's managed roots are in a consistent,
//!   inspectable state; the thread may allocate, call collaborator code,
//!   and may itself be paused by the collector.
//! - *unsafe*: the thread is manipulating raw managed data and must not
//!   be paused mid-operation.
//!
//! Instead of ambient global state, the safe-to-allocate precondition is
//! an explicit capability: operations that allocate, block, or call out
//! to collaborators take an [`AllocScope`] reference. The scopes are RAII
//! guards that nest by saving and restoring the previous mode.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Execution mode of the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadMode {
    SafeToAllocate,
    Unsafe,
}

thread_local! {
    static MODE: Cell<ThreadMode> = const { Cell::new(ThreadMode::Unsafe) };
    static GC_THREAD: Cell<bool> = const { Cell::new(false) };
    static CONTEXT_TOKEN: Cell<usize> = const { Cell::new(0) };
}

/// Next logical thread-context token. Token 0 is never handed out.
static NEXT_CONTEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// Opaque token identifying the logical apartment/context a thread runs in.
///
/// Contexts created on a thread are stamped with that thread's token, and
/// bulk release is scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(usize);

impl ContextToken {
    /// The token of the calling thread, assigned on first use.
    pub fn current() -> ContextToken {
        CONTEXT_TOKEN.with(|t| {
            let raw = t.get();
            if raw != 0 {
                return ContextToken(raw);
            }
            let fresh = NEXT_CONTEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            t.set(fresh);
            ContextToken(fresh)
        })
    }
}

/// RAII capability placing the current thread in safe-to-allocate mode.
///
/// Holding one proves to the type system that the thread may allocate,
/// acquire the cache lock, and call collaborator code. Scopes nest; the
/// previous mode is restored on drop. Not `Send`: the capability is bound
/// to the thread that entered it.
pub struct AllocScope {
    previous: ThreadMode,
    _not_send: PhantomData<*const ()>,
}

impl AllocScope {
    pub fn enter() -> AllocScope {
        let previous = MODE.with(|m| m.replace(ThreadMode::SafeToAllocate));
        AllocScope {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for AllocScope {
    fn drop(&mut self) {
        MODE.with(|m| m.set(self.previous));
    }
}

/// RAII guard for sections that manipulate raw managed data and must not
/// be paused mid-operation.
pub struct UnsafeScope {
    previous: ThreadMode,
    _not_send: PhantomData<*const ()>,
}

impl UnsafeScope {
    pub fn enter() -> UnsafeScope {
        let previous = MODE.with(|m| m.replace(ThreadMode::Unsafe));
        UnsafeScope {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for UnsafeScope {
    fn drop(&mut self) {
        MODE.with(|m| m.set(self.previous));
    }
}

/// Whether the current thread is in safe-to-allocate mode.
pub fn is_safe_to_allocate() -> bool {
    MODE.with(|m| m.get() == ThreadMode::SafeToAllocate)
}

/// Whether the current thread is executing the collector's tracking pass.
/// Collaborator invocations are categorically forbidden here.
pub fn is_gc_thread() -> bool {
    GC_THREAD.with(|g| g.get())
}

/// Marks the current thread as the collector's for the duration of the
/// tracking pass.
pub(crate) struct GcThreadScope {
    previous: bool,
}

impl GcThreadScope {
    pub(crate) fn enter() -> GcThreadScope {
        let previous = GC_THREAD.with(|g| g.replace(true));
        GcThreadScope { previous }
    }
}

impl Drop for GcThreadScope {
    fn drop(&mut self) {
        GC_THREAD.with(|g| g.set(self.previous));
    }
}
