//! Managed-side objects and their interop extension block.
//!
//! Each managed object carries one extension block with exactly two
//! publication points:
//!
//! - the **wrapper slot**: the object's managed object wrapper, published
//!   with a single atomic compare-and-set (at most one wrapper per object);
//! - the **context slot**: the external object context paired with the
//!   object, write-once (at most one context per object).
//!
//! A process-wide slot table maps extension-slot indices back to objects
//! so a context can resolve its paired object during a collector pause.
//! Index 0 is reserved as the "unlinked" sentinel.

use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::context::ExternalObjectContext;
use crate::lifecycle::WrapperHandle;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Index into the slot table. The raw sentinel value 0 means "unlinked".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(NonZeroU32);

impl SlotIndex {
    pub(crate) fn from_raw(raw: u32) -> Option<SlotIndex> {
        NonZeroU32::new(raw).map(SlotIndex)
    }

    pub(crate) fn as_u32(self) -> u32 {
        self.0.get()
    }
}

/// Interop extension block attached to every managed object.
struct InteropInfo {
    /// Published wrapper token, 0 when absent.
    wrapper: AtomicUsize,
    /// Paired external object context, write-once.
    context: OnceLock<Arc<ExternalObjectContext>>,
    /// Slot-table index, 0 when none. The table entry may be reclaimed
    /// out from under us (a discarded publish-race loser's slot is freed
    /// and recycled), so the raw index is only trusted after checking the
    /// entry still resolves to this object.
    slot: AtomicU32,
}

/// A managed object, as far as the bridge is concerned.
///
/// Payload and layout belong to the runtime; the bridge only needs stable
/// identity and the extension block.
pub struct ManagedObject {
    id: u64,
    interop: InteropInfo,
}

/// Shared handle to a managed object. Cloning is cheap; equality of the
/// underlying object is pointer identity, not value equality.
#[derive(Clone)]
pub struct ManagedHandle(Arc<ManagedObject>);

impl ManagedHandle {
    /// Allocate a fresh managed object with an empty extension block.
    #[allow(clippy::new_without_default)]
    pub fn new() -> ManagedHandle {
        ManagedHandle(Arc::new(ManagedObject {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            interop: InteropInfo {
                wrapper: AtomicUsize::new(0),
                context: OnceLock::new(),
                slot: AtomicU32::new(0),
            },
        }))
    }

    /// Stable identifier, used only for logging.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether two handles refer to the same managed object.
    pub fn same_object(&self, other: &ManagedHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The wrapper currently published for this object, if any.
    pub fn wrapper(&self) -> Option<WrapperHandle> {
        NonZeroUsize::new(self.0.interop.wrapper.load(Ordering::Acquire)).map(WrapperHandle::from_nonzero)
    }

    /// Atomically publish `wrapper` into the empty wrapper slot.
    ///
    /// On a lost race the incumbent wrapper is returned and the caller is
    /// expected to tear down its own.
    pub(crate) fn try_publish_wrapper(&self, wrapper: WrapperHandle) -> Result<(), WrapperHandle> {
        match self.0.interop.wrapper.compare_exchange(
            0,
            wrapper.as_usize(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(incumbent) => {
                // The slot is never cleared once set, so a failed CAS
                // always observed a published wrapper.
                Err(WrapperHandle::from_nonzero(
                    NonZeroUsize::new(incumbent).expect("wrapper slot raced with a zero publish"),
                ))
            }
        }
    }

    /// The context currently bound to this object, if any.
    pub fn context(&self) -> Option<&Arc<ExternalObjectContext>> {
        self.0.interop.context.get()
    }

    /// Bind `context` to this object. Fails if a context is already bound,
    /// which callers treat as an unsupported operation.
    pub(crate) fn try_set_context(&self, context: Arc<ExternalObjectContext>) -> bool {
        self.0.interop.context.set(context).is_ok()
    }

    /// The object's slot-table index, if one is assigned and its entry
    /// still resolves to this object. A stale index (entry reclaimed by
    /// another object) reads as absent.
    pub(crate) fn slot(&self) -> Option<SlotIndex> {
        let slot = SlotIndex::from_raw(self.0.interop.slot.load(Ordering::Acquire))?;
        SlotTable::global()
            .get(slot)
            .is_some_and(|entry| entry.same_object(self))
            .then_some(slot)
    }

    /// Assign (or fetch) the object's slot-table index, registering the
    /// object in the process-wide slot table.
    ///
    /// A cached index whose table entry was reclaimed is replaced with a
    /// fresh registration; the object is never left pointing at an entry
    /// owned by someone else.
    pub(crate) fn ensure_slot(&self) -> SlotIndex {
        loop {
            let raw = self.0.interop.slot.load(Ordering::Acquire);
            if let Some(slot) = SlotIndex::from_raw(raw) {
                let owned = SlotTable::global()
                    .get(slot)
                    .is_some_and(|entry| entry.same_object(self));
                if owned {
                    return slot;
                }
            }

            let fresh = SlotTable::global().register(self.clone());
            match self.0.interop.slot.compare_exchange(
                raw,
                fresh.as_u32(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return fresh,
                Err(_) => {
                    // A racing thread published a slot first; release ours
                    // and re-read.
                    SlotTable::global().clear(fresh);
                }
            }
        }
    }
}

impl fmt::Debug for ManagedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHandle")
            .field("id", &self.0.id)
            .field("has_wrapper", &self.wrapper().is_some())
            .field("has_context", &self.context().is_some())
            .finish()
    }
}

struct SlotTableInner {
    entries: Vec<Option<ManagedHandle>>,
    free: Vec<u32>,
}

/// Process-wide registry resolving extension-slot indices to objects.
///
/// Entries hold strong handles; the collector's mark-collected step is
/// what releases them. Entry 0 is permanently vacant so the sentinel can
/// never resolve.
pub(crate) struct SlotTable {
    inner: Mutex<SlotTableInner>,
}

static SLOT_TABLE: OnceLock<SlotTable> = OnceLock::new();

impl SlotTable {
    pub(crate) fn global() -> &'static SlotTable {
        SLOT_TABLE.get_or_init(|| SlotTable {
            inner: Mutex::new(SlotTableInner {
                entries: vec![None],
                free: Vec::new(),
            }),
        })
    }

    fn register(&self, handle: ManagedHandle) -> SlotIndex {
        let mut inner = self.inner.lock().expect("slot table poisoned");
        let raw = match inner.free.pop() {
            Some(raw) => {
                inner.entries[raw as usize] = Some(handle);
                raw
            }
            None => {
                inner.entries.push(Some(handle));
                (inner.entries.len() - 1) as u32
            }
        };
        tracing::trace!("Registered managed object in slot {}", raw);
        SlotIndex::from_raw(raw).expect("slot table produced the sentinel index")
    }

    pub(crate) fn get(&self, slot: SlotIndex) -> Option<ManagedHandle> {
        let inner = self.inner.lock().expect("slot table poisoned");
        inner.entries.get(slot.as_u32() as usize)?.clone()
    }

    /// Release the entry for `slot`. Idempotent.
    pub(crate) fn clear(&self, slot: SlotIndex) {
        let mut inner = self.inner.lock().expect("slot table poisoned");
        let idx = slot.as_u32() as usize;
        if idx < inner.entries.len() && inner.entries[idx].take().is_some() {
            inner.free.push(slot.as_u32());
            tracing::trace!("Cleared slot {}", slot.as_u32());
        }
    }
}
