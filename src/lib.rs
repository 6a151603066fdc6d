//! Cross-heap object-identity bridge.
//!
//! Lets a garbage-collected runtime and an externally reference-counted
//! object model share objects safely: every external object exposed into
//! the managed world, and every managed object exposed to the external
//! world, has exactly one canonical wrapper, and references crossing the
//! boundary are surfaced to the collector as ordinary graph edges so
//! cross-heap cycles can be reclaimed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bridge (per object model)                                  │
//! │  ├── get_or_create_wrapper    (managed → external wrapper)  │
//! │  ├── get_or_create_managed    (external → managed object)   │
//! │  ├── on_gc_started/_finished  (collector callbacks)         │
//! │  └── release_tracked_for_context (bulk release)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  GlobalCache (process-wide, lazily CAS-published)           │
//! │  └── ExternalIdentity → ExternalObjectContext               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RefCache (per qualifying collection)                       │
//! │  └── conditional-liveness edges: source ctx → target object │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The external object model is reached exclusively through three
//! collaborator traits: [`WrapperFactory`] (interface tables, counterpart
//! objects), [`ContextLifecycle`] (external-side state and wrapper
//! activity), and [`ReferenceTracking`] (boundary-edge enumeration during
//! a collector pause).
//!
//! Every operation that may allocate or call collaborator code requires
//! an [`AllocScope`] capability proving the thread is in a
//! safe-to-allocate state; the cache lock is never held across such a
//! call.

pub mod bridge;
pub mod cache;
pub mod context;
pub mod error;
pub mod factory;
pub mod flags;
pub mod identity;
pub mod lifecycle;
pub mod managed;
pub mod ref_cache;
pub mod thread_state;
pub mod tracking;

// Core API
pub use bridge::Bridge;
pub use cache::GlobalCache;
pub use context::{ContextFlags, ExternalObjectContext};
pub use error::{BridgeError, CollaboratorStatus};
pub use factory::{CustomQueryOutcome, InterfaceId, InterfaceTable, WrapperFactory};
pub use flags::{BridgeScenario, CreateObjectFlags, CreateWrapperFlags};
pub use identity::{ExternalIdentity, ExternalObject};
pub use lifecycle::{
    ContextLifecycle, ExternalContextResult, ExternalContextToken, WrapperActivity, WrapperHandle,
};
pub use managed::ManagedHandle;
pub use ref_cache::RefCache;
pub use thread_state::{AllocScope, ContextToken, UnsafeScope};
pub use tracking::{EdgeDisposition, ReferenceTracking, TrackingSession, TRACKED_GENERATION};
