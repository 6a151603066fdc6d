//! Canonical identity for external objects.
//!
//! The same external object may be reached through any number of its
//! interfaces; all of them must resolve to one referentially-stable,
//! pointer-sized identity. The cache is keyed by that identity, so the
//! resolution step runs before any cache interaction.

use std::fmt;
use std::num::NonZeroUsize;

use crate::error::BridgeError;

/// Canonical, pointer-sized key identifying one external object.
///
/// Obtained once per object and compared by value. Two handles to the
/// same external object always resolve to equal identities; that contract
/// is owned by the [`ExternalObject`] implementor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalIdentity(NonZeroUsize);

impl ExternalIdentity {
    /// Wrap a raw identity value. Returns `None` for the null identity.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(ExternalIdentity)
    }

    /// The raw pointer-sized value.
    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalIdentity({:#x})", self.0)
    }
}

impl fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A handle to an externally reference-counted object.
///
/// The bridge only ever asks an external object for its canonical
/// identity; every other interaction with the external side goes through
/// the collaborator traits.
pub trait ExternalObject {
    /// Resolve the canonical identity of this object.
    ///
    /// Must be stable for the lifetime of the object and equal across all
    /// handles to the same object. `None` indicates the handle does not
    /// reach a valid external object.
    fn canonical_identity(&self) -> Option<ExternalIdentity>;
}

/// Resolve an external handle to its identity, rejecting invalid handles
/// before any bridge state is touched.
pub fn resolve(external: &dyn ExternalObject) -> Result<ExternalIdentity, BridgeError> {
    external
        .canonical_identity()
        .ok_or(BridgeError::InvalidArgument("external object has no identity"))
}
