//! Context-lifecycle collaborator interface.
//!
//! The external object model sits behind this trait: it mints and destroys
//! the external-side state for contexts and wrappers, answers activity
//! queries, and supports the round-trip unwrap of wrappers back to their
//! managed objects. The bridge never touches external memory directly.

use std::num::NonZeroUsize;

use crate::error::CollaboratorStatus;
use crate::factory::InterfaceTable;
use crate::flags::{CreateObjectFlags, CreateWrapperFlags};
use crate::identity::ExternalIdentity;
use crate::managed::ManagedHandle;

/// Opaque token for one managed object wrapper on the external side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperHandle(NonZeroUsize);

impl WrapperHandle {
    pub fn from_raw(raw: usize) -> Option<WrapperHandle> {
        NonZeroUsize::new(raw).map(WrapperHandle)
    }

    pub(crate) fn from_nonzero(raw: NonZeroUsize) -> WrapperHandle {
        WrapperHandle(raw)
    }

    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

/// Opaque token for the external-side state paired with one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalContextToken(usize);

impl ExternalContextToken {
    pub fn from_raw(raw: usize) -> ExternalContextToken {
        ExternalContextToken(raw)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Result of minting external-side context state.
#[derive(Debug, Clone, Copy)]
pub struct ExternalContextResult {
    pub token: ExternalContextToken,
    /// The identity was obtained through the reference-tracker support
    /// path; the resulting context must be reference-tracked.
    pub from_tracker_runtime: bool,
}

/// Activity state of a wrapper whose external reference count is managed
/// outside the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperActivity {
    Active,
    /// The external reference count dropped to zero; the wrapper must be
    /// reactivated in place before reuse.
    Inactive,
}

/// External-side lifecycle operations for contexts and wrappers.
pub trait ContextLifecycle: Send + Sync {
    /// Allocate the external-side state for a possibly-new external
    /// identity. May block and allocate; never called under the cache lock.
    fn create_external_context(
        &self,
        identity: ExternalIdentity,
        flags: CreateObjectFlags,
    ) -> Result<ExternalContextResult, CollaboratorStatus>;

    /// Release external-side context state. Called for contexts that were
    /// collected as well as for freshly-built contexts that lost a publish
    /// race and were never visible.
    fn destroy_context(&self, token: ExternalContextToken);

    /// Construct a wrapper for `instance` from a computed interface table.
    /// The wrapper is created holding one strong reference.
    fn create_wrapper(
        &self,
        instance: ManagedHandle,
        table: InterfaceTable,
        flags: CreateWrapperFlags,
    ) -> Result<WrapperHandle, CollaboratorStatus>;

    /// Tear down a wrapper: either one that lost the publish race or one
    /// whose managed object died.
    fn destroy_wrapper(&self, wrapper: WrapperHandle);

    /// Whether the wrapper's external reference count still holds it live.
    fn is_wrapper_active(&self, wrapper: WrapperHandle)
        -> Result<WrapperActivity, CollaboratorStatus>;

    /// Re-arm an inactive wrapper in place with a fresh strong reference
    /// to its managed object.
    fn reactivate_wrapper(
        &self,
        wrapper: WrapperHandle,
        instance: ManagedHandle,
    ) -> Result<(), CollaboratorStatus>;

    /// Note that a wrapper was handed out through an external activation
    /// path. Benign no-op if `wrapper` is not a recognized wrapper.
    fn mark_externally_activated(&self, wrapper: WrapperHandle) -> Result<(), CollaboratorStatus>;

    /// If `identity` is itself a wrapper around a managed object, return
    /// that object. Supports round-tripping object → external → object
    /// without creating a context.
    fn managed_object_for_wrapper(&self, identity: ExternalIdentity) -> Option<ManagedHandle>;

    /// Whether the wrapper behind `identity` has been externally activated.
    /// An activated wrapper is not eligible for the round-trip unwrap.
    fn is_externally_activated(&self, identity: ExternalIdentity) -> bool;

    /// Detach a context from any reference-tracker bookkeeping. Idempotent
    /// and safe for contexts that never had any.
    fn separate_from_tracker(&self, token: ExternalContextToken);
}
