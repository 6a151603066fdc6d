//! External object contexts: the managed-side bookkeeping paired with one
//! external identity.
//!
//! A context is constructed once per newly-bridged external identity and
//! mutated from exactly two directions: the wrapper bridge publishes it
//! (into the cache and the object's extension slot) and the collector
//! marks it collected. The `Active → Collected` transition is terminal and
//! happens only during an active collection.

use bitflags::bitflags;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::identity::ExternalIdentity;
use crate::lifecycle::ExternalContextToken;
use crate::managed::{ManagedHandle, SlotIndex, SlotTable};
use crate::thread_state::ContextToken;
use crate::tracking;

bitflags! {
    /// Lifecycle state bits of a context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// Set exactly once, by the collector, during an active collection.
        const COLLECTED = 1 << 0;
        /// The identity came from the reference-tracker support path.
        const REFERENCE_TRACKED = 1 << 1;
        /// The context is currently reachable through the global cache.
        const CACHED_GLOBALLY = 1 << 2;
    }
}

/// Raw slot value meaning "unlinked". Only observed after collection.
const SLOT_UNLINKED: u32 = 0;

/// Managed-side record pairing one external identity with one managed
/// object's extension slot.
pub struct ExternalObjectContext {
    identity: ExternalIdentity,
    thread_context: ContextToken,
    external: ExternalContextToken,
    slot: AtomicU32,
    flags: AtomicU32,
}

impl ExternalObjectContext {
    pub(crate) fn new(
        identity: ExternalIdentity,
        thread_context: ContextToken,
        external: ExternalContextToken,
        slot: SlotIndex,
        flags: ContextFlags,
    ) -> ExternalObjectContext {
        debug_assert!(!flags.contains(ContextFlags::COLLECTED));
        ExternalObjectContext {
            identity,
            thread_context,
            external,
            slot: AtomicU32::new(slot.as_u32()),
            flags: AtomicU32::new(flags.bits()),
        }
    }

    pub fn identity(&self) -> ExternalIdentity {
        self.identity
    }

    pub fn thread_context(&self) -> ContextToken {
        self.thread_context
    }

    /// Token for the external-side state paired with this context.
    pub fn external_token(&self) -> ExternalContextToken {
        self.external
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_set(&self, flags: ContextFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Active means a valid slot and not yet collected. Every context
    /// reachable through the global cache is active.
    pub fn is_active(&self) -> bool {
        !self.is_set(ContextFlags::COLLECTED) && self.slot.load(Ordering::Acquire) != SLOT_UNLINKED
    }

    pub(crate) fn slot_index(&self) -> Option<SlotIndex> {
        SlotIndex::from_raw(self.slot.load(Ordering::Acquire))
    }

    /// Resolve the paired managed object through the slot table.
    ///
    /// Returns `None` once the context has been collected.
    pub fn managed_object(&self) -> Option<ManagedHandle> {
        let slot = self.slot_index()?;
        let resolved = SlotTable::global().get(slot);
        debug_assert!(resolved.is_some(), "active context slot failed to resolve");
        resolved
    }

    pub(crate) fn insert_flags(&self, flags: ContextFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove_flags(&self, flags: ContextFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Irreversible `Active → Collected` transition. Collector-only, and
    /// only while a collection is in progress.
    pub(crate) fn mark_collected(&self) {
        debug_assert!(tracking::gc_in_progress(), "collected outside a collection");
        debug_assert!(self.is_active(), "collected a non-active context");
        self.slot.store(SLOT_UNLINKED, Ordering::Release);
        self.insert_flags(ContextFlags::COLLECTED);
    }
}

impl fmt::Debug for ExternalObjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalObjectContext")
            .field("identity", &self.identity)
            .field("thread_context", &self.thread_context)
            .field("flags", &self.flags())
            .field("active", &self.is_active())
            .finish()
    }
}
