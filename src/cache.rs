//! Process-wide identity → context cache.
//!
//! The cache is the single source of truth for "which external identities
//! are already bridged". It owns every context carrying
//! `CACHED_GLOBALLY`; removal is the only way a context loses that flag.
//!
//! Locking rules (load-bearing, see the concurrency model in the crate
//! docs): every mutating operation requires the calling thread to be in
//! safe-to-allocate state, the lock is never held across a blocking or
//! allocating call, and the collector gets lock-free iteration only
//! during its exclusive pause window. Callers that drop the lock to call
//! a collaborator re-validate through [`GlobalCache::find_or_insert`]
//! rather than trusting an earlier lookup.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::{ContextFlags, ExternalObjectContext};
use crate::identity::ExternalIdentity;
use crate::thread_state::{self, AllocScope};
use crate::tracking;

/// Identity-keyed map of active external object contexts.
pub struct GlobalCache {
    map: Mutex<HashMap<ExternalIdentity, Arc<ExternalObjectContext>>>,
}

/// Lazily published singleton. First thread to finish construction wins
/// the compare-exchange; losers drop their instance. The winner is never
/// torn down for the lifetime of the process.
static INSTANCE: AtomicPtr<GlobalCache> = AtomicPtr::new(ptr::null_mut());

impl GlobalCache {
    fn new() -> GlobalCache {
        GlobalCache {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide cache, constructing it on first use.
    pub fn instance() -> &'static GlobalCache {
        let existing = INSTANCE.load(Ordering::Acquire);
        if !existing.is_null() {
            // SAFETY: a published instance is never deallocated.
            return unsafe { &*existing };
        }

        let fresh = Box::into_raw(Box::new(GlobalCache::new()));
        match INSTANCE.compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                tracing::debug!("Global cache initialized");
                // SAFETY: we just published this pointer and it is never freed.
                unsafe { &*fresh }
            }
            Err(winner) => {
                // Lost the publish race; discard our instance.
                // SAFETY: fresh was never shared.
                drop(unsafe { Box::from_raw(fresh) });
                // SAFETY: the winner's instance is never deallocated.
                unsafe { &*winner }
            }
        }
    }

    /// The cache if some thread already constructed it. Used on collector
    /// paths, which must not trigger construction.
    pub fn instance_if_initialized() -> Option<&'static GlobalCache> {
        let existing = INSTANCE.load(Ordering::Acquire);
        // SAFETY: a published instance is never deallocated.
        (!existing.is_null()).then(|| unsafe { &*existing })
    }

    /// Look up the context for `identity`. A hit is guaranteed active:
    /// the collector removes a context from the cache in the same step
    /// that marks it collected.
    pub fn find(
        &self,
        _scope: &AllocScope,
        identity: ExternalIdentity,
    ) -> Option<Arc<ExternalObjectContext>> {
        debug_assert!(thread_state::is_safe_to_allocate());
        let map = self.map.lock().expect("global cache poisoned");
        map.get(&identity).cloned()
    }

    /// Insert `context`. Precondition: no entry exists for its identity.
    pub fn insert(&self, _scope: &AllocScope, context: Arc<ExternalObjectContext>) {
        debug_assert!(thread_state::is_safe_to_allocate());
        debug_assert!(context.is_set(ContextFlags::CACHED_GLOBALLY));
        let mut map = self.map.lock().expect("global cache poisoned");
        let prior = map.insert(context.identity(), context);
        debug_assert!(prior.is_none(), "insert over an existing cache entry");
    }

    /// Atomic find-or-insert for `context`'s identity: returns the
    /// incumbent if one race-won, otherwise publishes `context`. This is
    /// the re-validation step for callers that released the lock to call
    /// a collaborator.
    pub fn find_or_insert(
        &self,
        _scope: &AllocScope,
        context: Arc<ExternalObjectContext>,
    ) -> Arc<ExternalObjectContext> {
        debug_assert!(thread_state::is_safe_to_allocate());
        let mut map = self.map.lock().expect("global cache poisoned");
        map.entry(context.identity()).or_insert(context).clone()
    }

    /// Remove `context`, clearing its `CACHED_GLOBALLY` flag.
    ///
    /// Runs either on a safe-to-allocate mutator thread (rollback paths)
    /// or on the collector's thread during a pause.
    pub fn remove(&self, context: &ExternalObjectContext) {
        debug_assert!(thread_state::is_safe_to_allocate() || tracking::gc_in_progress());
        let mut map = self.map.lock().expect("global cache poisoned");
        let removed = map.remove(&context.identity());
        debug_assert!(
            removed.is_some_and(|entry| ptr::eq(Arc::as_ptr(&entry), context)),
            "removed a different context for the same identity"
        );
        context.remove_flags(ContextFlags::CACHED_GLOBALLY);
        tracing::trace!("Removed context for {} from global cache", context.identity());
    }

    /// Materialized snapshot of contexts matching `predicate`.
    pub fn snapshot_filtered<F>(
        &self,
        _scope: &AllocScope,
        predicate: F,
    ) -> Vec<Arc<ExternalObjectContext>>
    where
        F: Fn(&ExternalObjectContext) -> bool,
    {
        debug_assert!(thread_state::is_safe_to_allocate());
        let map = self.map.lock().expect("global cache poisoned");
        map.values().filter(|c| predicate(c)).cloned().collect()
    }

    /// Snapshot of every context, taken by the collector while mutators
    /// are paused.
    pub(crate) fn snapshot_for_pause(&self) -> Vec<Arc<ExternalObjectContext>> {
        debug_assert!(tracking::gc_in_progress());
        // Mutators are paused; the lock is uncontended.
        let map = self.map.lock().expect("global cache poisoned");
        map.values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, identity: ExternalIdentity) -> bool {
        self.map
            .lock()
            .expect("global cache poisoned")
            .contains_key(&identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ExternalContextToken;
    use crate::managed::ManagedHandle;
    use crate::thread_state::ContextToken;

    fn cached_context(identity_raw: usize) -> Arc<ExternalObjectContext> {
        let obj = ManagedHandle::new();
        Arc::new(ExternalObjectContext::new(
            ExternalIdentity::from_raw(identity_raw).unwrap(),
            ContextToken::current(),
            ExternalContextToken::from_raw(0),
            obj.ensure_slot(),
            ContextFlags::CACHED_GLOBALLY,
        ))
    }

    #[test]
    fn test_singleton_is_stable() {
        let a = GlobalCache::instance() as *const GlobalCache;
        let b = GlobalCache::instance() as *const GlobalCache;
        assert_eq!(a, b);
        assert!(GlobalCache::instance_if_initialized().is_some());
    }

    #[test]
    fn test_find_or_insert_returns_incumbent() {
        let scope = AllocScope::enter();
        let cache = GlobalCache::instance();

        let first = cached_context(0x9100);
        let second = cached_context(0x9100);

        let published = cache.find_or_insert(&scope, first.clone());
        assert!(Arc::ptr_eq(&published, &first));

        let raced = cache.find_or_insert(&scope, second.clone());
        assert!(Arc::ptr_eq(&raced, &first));

        cache.remove(&first);
        assert!(!cache.contains(first.identity()));
        assert!(!first.is_set(ContextFlags::CACHED_GLOBALLY));
    }

    #[test]
    fn test_snapshot_filtered_is_materialized() {
        let scope = AllocScope::enter();
        let cache = GlobalCache::instance();

        let ctx = cached_context(0x9200);
        cache.insert(&scope, ctx.clone());

        let token = ctx.thread_context();
        let snapshot = cache.snapshot_filtered(&scope, |c| {
            c.thread_context() == token && c.identity() == ctx.identity()
        });
        assert_eq!(snapshot.len(), 1);

        // Mutating the cache after the fact does not disturb the snapshot.
        cache.remove(&ctx);
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &ctx));
    }
}
