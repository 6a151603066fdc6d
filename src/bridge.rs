//! The wrapper bridge: find-or-create protocols in both directions,
//! collector integration, and thread-scoped bulk release.
//!
//! Both protocols share one shape: look up, compute the expensive part
//! without holding any lock, re-validate, then publish with a single
//! atomic step. Losers of a publish race tear down their own work and
//! adopt the winner's; nothing is ever retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::GlobalCache;
use crate::context::{ContextFlags, ExternalObjectContext};
use crate::error::BridgeError;
use crate::factory::{self, CustomQueryOutcome, InterfaceId, WrapperFactory};
use crate::flags::{BridgeScenario, CreateObjectFlags, CreateWrapperFlags};
use crate::identity::{self, ExternalIdentity, ExternalObject};
use crate::lifecycle::{ContextLifecycle, ExternalContextToken, WrapperActivity, WrapperHandle};
use crate::managed::{ManagedHandle, SlotTable};
use crate::ref_cache::RefCache;
use crate::thread_state::{self, AllocScope, ContextToken, GcThreadScope};
use crate::tracking::{self, ReferenceTracking, TrackingSession, TRACKED_GENERATION};

/// Destroys freshly-minted external context state unless the context is
/// published, at which point the state is detached into the context.
struct ExternalContextHolder<'a> {
    lifecycle: &'a dyn ContextLifecycle,
    token: Option<ExternalContextToken>,
}

impl<'a> ExternalContextHolder<'a> {
    fn new(lifecycle: &'a dyn ContextLifecycle, token: ExternalContextToken) -> Self {
        ExternalContextHolder {
            lifecycle,
            token: Some(token),
        }
    }

    fn token(&self) -> ExternalContextToken {
        self.token.expect("holder already detached")
    }

    fn detach(&mut self) {
        self.token = None;
    }
}

impl Drop for ExternalContextHolder<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lifecycle.destroy_context(token);
        }
    }
}

/// Coordinator for one bridged external object model.
///
/// Owns the collaborator handles, the per-pass reference cache, and the
/// tracking-pass nesting guard. The identity cache itself is process-wide
/// and shared (see [`GlobalCache`]).
pub struct Bridge {
    lifecycle: Arc<dyn ContextLifecycle>,
    tracker: Arc<dyn ReferenceTracking>,
    ref_cache: RefCache,
    /// Set while a qualifying collection's tracking pass is open; makes
    /// begin/end idempotent under nested collections.
    tracking_pass_open: AtomicBool,
}

impl Bridge {
    pub fn new(lifecycle: Arc<dyn ContextLifecycle>, tracker: Arc<dyn ReferenceTracking>) -> Bridge {
        Bridge {
            lifecycle,
            tracker,
            ref_cache: RefCache::new(),
            tracking_pass_open: AtomicBool::new(false),
        }
    }

    /// Conditional-liveness edges recorded by the most recent tracking
    /// pass, for the collector to consume.
    pub fn ref_cache(&self) -> &RefCache {
        &self.ref_cache
    }

    // ----- managed object -> wrapper ------------------------------------

    /// Find or create the external-facing wrapper for `instance`.
    ///
    /// Exactly one live wrapper exists per managed object at any time. A
    /// factory that reports interface entries without backing storage
    /// produces no wrapper (`Ok(None)`); collaborator failures propagate
    /// with no partial state published.
    pub fn get_or_create_wrapper(
        &self,
        _scope: &AllocScope,
        factory_override: Option<&Arc<dyn WrapperFactory>>,
        instance: &ManagedHandle,
        flags: CreateWrapperFlags,
        scenario: BridgeScenario,
    ) -> Result<Option<WrapperHandle>, BridgeError> {
        let mut created = None;
        let mut existing = instance.wrapper();

        if existing.is_none() {
            let factory = factory::resolve(scenario, factory_override)?;

            // Computing the interface table may allocate and call
            // application code, so it runs without any lock held. The
            // call is idempotent per object identity, which is what makes
            // the unlocked call sound.
            let table = factory
                .compute_interfaces(scenario, instance, flags)
                .map_err(BridgeError::Creation)?;

            // Re-check the slot: another thread may have published while
            // the table was being computed.
            existing = instance.wrapper();
            if existing.is_none() && table.is_valid() {
                let wrapper = self
                    .lifecycle
                    .create_wrapper(instance.clone(), table, flags)
                    .map_err(BridgeError::Creation)?;

                match instance.try_publish_wrapper(wrapper) {
                    Ok(()) => created = Some(wrapper),
                    Err(incumbent) => {
                        // Lost the publish race; tear down ours and use
                        // the incumbent.
                        self.lifecycle.destroy_wrapper(wrapper);
                        existing = Some(incumbent);
                    }
                }
            }
        }

        if let Some(wrapper) = created {
            tracing::debug!("Created wrapper {:#x} for object {}", wrapper.as_usize(), instance.id());
            return Ok(Some(wrapper));
        }

        let Some(wrapper) = existing else {
            return Ok(None);
        };

        // A pre-existing wrapper may have gone inactive through external
        // release channels. Reactivate it in place rather than creating a
        // second wrapper.
        match self
            .lifecycle
            .is_wrapper_active(wrapper)
            .map_err(BridgeError::Creation)?
        {
            WrapperActivity::Active => {}
            WrapperActivity::Inactive => {
                tracing::debug!("Reactivating wrapper {:#x} for object {}", wrapper.as_usize(), instance.id());
                self.lifecycle
                    .reactivate_wrapper(wrapper, instance.clone())
                    .map_err(BridgeError::Creation)?;
            }
        }

        Ok(Some(wrapper))
    }

    // ----- external object -> managed object ----------------------------

    /// Find or create the managed counterpart for an external object.
    ///
    /// `Ok(None)` means the factory declined to produce an object; the
    /// caller decides whether that is an error. At most one context exists
    /// per identity (when cached) and one per managed object, always.
    pub fn get_or_create_managed(
        &self,
        scope: &AllocScope,
        factory_override: Option<&Arc<dyn WrapperFactory>>,
        external: &dyn ExternalObject,
        flags: CreateObjectFlags,
        scenario: BridgeScenario,
        supplied_wrapper: Option<ManagedHandle>,
    ) -> Result<Option<ManagedHandle>, BridgeError> {
        let identity = identity::resolve(external)?;
        self.get_or_create_managed_for_identity(
            scope,
            factory_override,
            identity,
            flags,
            scenario,
            supplied_wrapper,
        )
    }

    fn get_or_create_managed_for_identity(
        &self,
        scope: &AllocScope,
        factory_override: Option<&Arc<dyn WrapperFactory>>,
        identity: ExternalIdentity,
        flags: CreateObjectFlags,
        scenario: BridgeScenario,
        supplied_wrapper: Option<ManagedHandle>,
    ) -> Result<Option<ManagedHandle>, BridgeError> {
        let cache = GlobalCache::instance();
        let unique_instance = flags.contains(CreateObjectFlags::UNIQUE_INSTANCE);

        if !unique_instance {
            if let Some(context) = cache.find(scope, identity) {
                // A context found in the cache is guaranteed active: the
                // collector removes it in the same step that collects it.
                let object = context
                    .managed_object()
                    .expect("cached context lost its object");
                tracing::trace!("Cache hit for {}", identity);
                return Ok(Some(object));
            }

            // The external instance may itself be a non-activated wrapper
            // around a managed object. Unwrap it to allow round-tripping
            // object -> external instance -> object with no new context.
            if scenario == BridgeScenario::Marshalling {
                if let Some(object) = self.lifecycle.managed_object_for_wrapper(identity) {
                    if !self.lifecycle.is_externally_activated(identity) {
                        tracing::trace!("Unwrapped {} to object {}", identity, object.id());
                        return Ok(Some(object));
                    }
                }
            }
        }

        // Allocate external-side context state for the possibly-new
        // identity. May block and allocate; no lock is held, so the cache
        // must be re-validated before publication below.
        let created = self
            .lifecycle
            .create_external_context(identity, flags)
            .map_err(BridgeError::Creation)?;
        let mut holder = ExternalContextHolder::new(&*self.lifecycle, created.token);

        // The caller may supply the counterpart; otherwise ask the factory.
        let object = match supplied_wrapper {
            Some(object) => Some(object),
            None => factory::resolve(scenario, factory_override)?
                .create_object(scenario, identity, flags)
                .map_err(BridgeError::Creation)?,
        };

        // No object produced is a legal outcome, not an error. The holder
        // tears the external side back down; the cache is untouched.
        let Some(object) = object else {
            return Ok(None);
        };

        let mut context_flags = ContextFlags::empty();
        if created.from_tracker_runtime {
            context_flags |= ContextFlags::REFERENCE_TRACKED;
        }
        if !unique_instance {
            context_flags |= ContextFlags::CACHED_GLOBALLY;
        }

        let had_slot = object.slot().is_some();
        let slot = object.ensure_slot();
        let context = Arc::new(ExternalObjectContext::new(
            identity,
            ContextToken::current(),
            holder.token(),
            slot,
            context_flags,
        ));

        // A unique-instance context stays private; otherwise publish
        // atomically, re-validating the lookup done above.
        let published = if unique_instance {
            context.clone()
        } else {
            cache.find_or_insert(scope, context.clone())
        };

        if !Arc::ptr_eq(&published, &context) {
            // Another thread's context won the race. Discard ours (the
            // holder destroys the external side) and adopt the winner's
            // object.
            if !had_slot {
                SlotTable::global().clear(slot);
            }
            let object = published
                .managed_object()
                .expect("incumbent context lost its object");
            tracing::trace!("Lost context race for {}", identity);
            return Ok(Some(object));
        }

        // Our context won (or is private): bind it to the object. A
        // managed object carries at most one context, so an occupied slot
        // means a caller-supplied wrapper already bound elsewhere.
        if !object.try_set_context(context.clone()) {
            if !unique_instance {
                cache.remove(&context);
            }
            return Err(BridgeError::Unsupported);
        }

        holder.detach();
        debug_assert!(context.is_active());
        tracing::debug!(
            "Created context for {} (unique: {}, tracked: {})",
            identity,
            unique_instance,
            context.is_set(ContextFlags::REFERENCE_TRACKED)
        );
        Ok(Some(object))
    }

    // ----- composed and auxiliary operations ----------------------------

    /// Resolve an external object to its managed counterpart and then to
    /// that counterpart's wrapper, for handoff to the tracker runtime.
    pub fn get_or_create_tracker_target(
        &self,
        scope: &AllocScope,
        external: &dyn ExternalObject,
        object_flags: CreateObjectFlags,
        wrapper_flags: CreateWrapperFlags,
    ) -> Result<WrapperHandle, BridgeError> {
        let object = self
            .get_or_create_managed(
                scope,
                None,
                external,
                object_flags,
                BridgeScenario::TrackerSupport,
                None,
            )?
            .ok_or(BridgeError::InvalidArgument(
                "no managed object produced for external instance",
            ))?;

        let wrapper = self
            .get_or_create_wrapper(scope, None, &object, wrapper_flags, BridgeScenario::TrackerSupport)?
            .ok_or(BridgeError::InvalidArgument(
                "no wrapper produced for managed object",
            ))?;

        tracing::debug!(
            "Created tracker target for external: object {} => wrapper {:#x}",
            object.id(),
            wrapper.as_usize()
        );
        Ok(wrapper)
    }

    /// Dispatch a custom query-interface request against `target`.
    ///
    /// Refused outright on the collector's thread, where application code
    /// cannot run; reported as a failure to invoke when no global factory
    /// is available.
    pub fn try_invoke_custom_query_interface(
        &self,
        target: &ManagedHandle,
        interface: InterfaceId,
    ) -> Result<CustomQueryOutcome, BridgeError> {
        if thread_state::is_gc_thread() {
            return Err(BridgeError::OnGcThread);
        }

        let factory = factory::global().ok_or(BridgeError::FailedToInvoke)?;
        Ok(factory.custom_query_interface(target, interface))
    }

    /// Note that `wrapper` was handed out through an external activation
    /// path. Benign no-op if the token is not a recognized wrapper.
    pub fn mark_wrapper_externally_activated(&self, wrapper: WrapperHandle) {
        if let Err(status) = self.lifecycle.mark_externally_activated(wrapper) {
            tracing::trace!("Activation mark ignored for {:#x}: {}", wrapper.as_usize(), status);
        }
    }

    // ----- marshalling entry points -------------------------------------

    /// Marshaling-layer wrapper creation through the global factory.
    /// `Ok(None)` when no factory is registered for marshaling.
    pub fn get_or_create_wrapper_for_marshalling(
        &self,
        scope: &AllocScope,
        instance: &ManagedHandle,
    ) -> Result<Option<WrapperHandle>, BridgeError> {
        if !factory::is_marshalling_registered() {
            return Ok(None);
        }
        self.get_or_create_wrapper(
            scope,
            None,
            instance,
            CreateWrapperFlags::TRACKER_SUPPORT,
            BridgeScenario::Marshalling,
        )
    }

    /// Marshaling-layer object resolution through the global factory.
    /// `Ok(None)` when no factory is registered for marshaling.
    pub fn get_or_create_managed_for_marshalling(
        &self,
        scope: &AllocScope,
        external: &dyn ExternalObject,
        unique_instance: bool,
    ) -> Result<Option<ManagedHandle>, BridgeError> {
        if !factory::is_marshalling_registered() {
            return Ok(None);
        }
        let mut flags = CreateObjectFlags::TRACKER_OBJECT;
        if unique_instance {
            flags |= CreateObjectFlags::UNIQUE_INSTANCE;
        }
        self.get_or_create_managed(scope, None, external, flags, BridgeScenario::Marshalling, None)
    }

    // ----- thread-scoped bulk release -----------------------------------

    /// Release every reference-tracked context created in the logical
    /// thread context `token`: detach each from tracker bookkeeping, then
    /// hand the exactly-sized batch to the global factory for teardown.
    pub fn release_tracked_for_context(
        &self,
        scope: &AllocScope,
        token: ContextToken,
    ) -> Result<usize, BridgeError> {
        let matches = GlobalCache::instance().snapshot_filtered(scope, |ctx| {
            ctx.is_set(ContextFlags::REFERENCE_TRACKED) && ctx.thread_context() == token
        });
        if matches.is_empty() {
            return Ok(0);
        }

        // The factory performs the release; resolve it before touching any
        // tracker bookkeeping so a missing factory leaves every context
        // untouched.
        let factory = factory::global().ok_or(BridgeError::InvalidArgument(
            "no global wrapper factory registered",
        ))?;

        let mut objects = Vec::with_capacity(matches.len());
        for context in &matches {
            // Safe even for contexts that never had tracker bookkeeping.
            self.lifecycle.separate_from_tracker(context.external_token());
            let object = context
                .managed_object()
                .expect("cached context lost its object");
            tracing::trace!("Releasing tracked context for {}", context.identity());
            objects.push(object);
        }

        let count = objects.len();
        factory.release_objects(objects);
        Ok(count)
    }

    // ----- collector integration ----------------------------------------

    /// Collector callback: a context's paired managed object was found
    /// dead. Performs the terminal `Active → Collected` transition,
    /// removing the context from the cache in the same step. Private
    /// (unique-instance) contexts take the identical transition minus the
    /// cache removal.
    pub fn notify_context_collected(&self, context: &Arc<ExternalObjectContext>) {
        debug_assert!(tracking::gc_in_progress(), "collected outside a collection");

        let slot = context.slot_index();
        let was_cached = context.is_set(ContextFlags::CACHED_GLOBALLY);
        context.mark_collected();

        tracing::debug!(
            "Marked context collected for {} (cached: {})",
            context.identity(),
            was_cached
        );

        if was_cached {
            let cache = GlobalCache::instance_if_initialized()
                .expect("cached context without a cache instance");
            cache.remove(context);
        }

        if let Some(slot) = slot {
            SlotTable::global().clear(slot);
        }
    }

    /// Release the external-side state of a collected context. Destroying
    /// an active context is a contract violation.
    pub fn destroy_context(&self, context: Arc<ExternalObjectContext>) {
        debug_assert!(!context.is_active(), "destroying an active context");
        debug_assert!(!context.is_set(ContextFlags::CACHED_GLOBALLY));
        tracing::debug!("Destroying context for {}", context.identity());
        self.lifecycle.destroy_context(context.external_token());
    }

    /// Tear down the wrapper of a managed object that was collected.
    pub fn destroy_wrapper(&self, wrapper: WrapperHandle) {
        tracing::debug!("Destroying wrapper {:#x}", wrapper.as_usize());
        self.lifecycle.destroy_wrapper(wrapper);
    }

    /// Collector callback at the start of a collection condemning
    /// `condemned_generation`.
    ///
    /// Only the outermost qualifying collection (one reaching
    /// [`TRACKED_GENERATION`]) runs the tracking pass; collections nested
    /// inside it, qualifying or not, are ignored by the guard.
    pub fn on_gc_started(&self, condemned_generation: u32) {
        tracking::enter_collection();

        if condemned_generation < TRACKED_GENERATION {
            return;
        }
        if self.tracking_pass_open.swap(true, Ordering::SeqCst) {
            // Nested qualifying collection; the outer pass owns tracking.
            return;
        }

        // If no cache exists yet there is nothing to walk; leave the pass
        // closed so the matching finish does not signal the collaborator.
        let Some(cache) = GlobalCache::instance_if_initialized() else {
            self.tracking_pass_open.store(false, Ordering::SeqCst);
            return;
        };

        tracing::debug!(
            "Begin reference tracking (condemned generation {})",
            condemned_generation
        );

        self.ref_cache.reset();

        // Mutators are paused: the snapshot is consistent and collaborator
        // reports run on the collector's thread.
        let contexts = cache.snapshot_for_pause();
        let _gc_thread = GcThreadScope::enter();
        let mut session = TrackingSession::new(contexts, &self.ref_cache);
        self.tracker.begin_tracking(&mut session);

        self.ref_cache.compact();
    }

    /// Collector callback at the end of a collection condemning
    /// `condemned_generation`. Closes the tracking pass opened by the
    /// matching qualifying start, exactly once.
    pub fn on_gc_finished(&self, condemned_generation: u32) {
        if condemned_generation >= TRACKED_GENERATION
            && self.tracking_pass_open.swap(false, Ordering::SeqCst)
        {
            let _gc_thread = GcThreadScope::enter();
            self.tracker.end_tracking();
            tracing::debug!("End reference tracking");
        }

        tracking::leave_collection();
    }
}
