//! Error taxonomy for bridge operations.
//!
//! Collaborator-reported failures are recoverable and surfaced to the
//! caller; cache/context invariant violations are programming errors and
//! are enforced with debug assertions instead.

use std::fmt;

/// Opaque status code reported by a collaborator on failure.
///
/// The bridge never interprets the value; it is carried through so the
/// caller can map it back onto the external object model's error domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollaboratorStatus(pub i32);

impl fmt::Display for CollaboratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

/// Errors surfaced by the wrapper bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// A factory or context-lifecycle collaborator returned an error status.
    Creation(CollaboratorStatus),

    /// The managed object is already bound to a different context.
    /// Fails fast; the cache entry has been rolled back. No retry.
    Unsupported,

    /// A null or invalid argument was rejected before any mutation.
    InvalidArgument(&'static str),

    /// A collaborator call was attempted from the collector's own thread.
    OnGcThread,

    /// No execution context could be established for a collaborator call.
    FailedToInvoke,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Creation(status) => {
                write!(f, "collaborator reported creation failure: {status}")
            }
            BridgeError::Unsupported => {
                write!(f, "managed object is already bound to a different context")
            }
            BridgeError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            BridgeError::OnGcThread => {
                write!(f, "collaborator calls are forbidden on the GC thread")
            }
            BridgeError::FailedToInvoke => {
                write!(f, "no execution context could be established")
            }
        }
    }
}

impl std::error::Error for BridgeError {}
