//! Creation flags and bridging scenarios.

use bitflags::bitflags;

bitflags! {
    /// Options for bridging an external object into the managed world.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateObjectFlags: u32 {
        /// The external object participates in the reference-tracker runtime.
        const TRACKER_OBJECT = 1 << 0;
        /// Bypass the identity cache entirely: a fresh managed object and a
        /// private (never cached) context are produced on every call.
        const UNIQUE_INSTANCE = 1 << 1;
    }
}

bitflags! {
    /// Options for exposing a managed object to the external world.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateWrapperFlags: u32 {
        /// The wrapper supplies its own base-interface identity.
        const CALLER_DEFINED_IDENTITY = 1 << 0;
        /// The wrapper participates in the reference-tracker runtime.
        const TRACKER_SUPPORT = 1 << 1;
    }
}

/// The calling pattern a bridge operation runs under.
///
/// An explicit per-call factory implementation is required for `Instance`
/// and forbidden for the two global scenarios, which dispatch to the
/// registered global factory instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeScenario {
    /// Direct call with a caller-supplied factory implementation.
    Instance,
    /// Invoked on behalf of the reference-tracker runtime.
    TrackerSupport,
    /// Invoked by the marshaling layer through the global factory.
    Marshalling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_instance_flag() {
        let flags = CreateObjectFlags::TRACKER_OBJECT | CreateObjectFlags::UNIQUE_INSTANCE;
        assert!(flags.contains(CreateObjectFlags::UNIQUE_INSTANCE));
        assert!(!CreateObjectFlags::TRACKER_OBJECT.contains(CreateObjectFlags::UNIQUE_INSTANCE));
    }
}
