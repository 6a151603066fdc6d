//! Pluggable wrapper factory: the application-level collaborator that
//! computes interface tables and constructs counterpart objects.
//!
//! One implementation may be registered globally for the process; every
//! operation additionally accepts a per-call override. The `Instance`
//! scenario requires an override and the global scenarios forbid one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{BridgeError, CollaboratorStatus};
use crate::flags::{BridgeScenario, CreateObjectFlags, CreateWrapperFlags};
use crate::identity::ExternalIdentity;
use crate::managed::ManagedHandle;

/// Computed external interface table for one managed object.
///
/// `entries` is an opaque storage token owned by the factory; a zero token
/// with a zero count is a legal empty table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceTable {
    pub entries: usize,
    pub count: u32,
}

impl InterfaceTable {
    /// A table reporting entries without storage is malformed and yields
    /// no wrapper.
    pub fn is_valid(&self) -> bool {
        self.entries != 0 || self.count == 0
    }
}

/// Identifier of an external interface, for custom query dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u128);

/// A factory's answer to a custom query-interface dispatch.
///
/// Calls that cannot be made at all (no factory, collector's thread) are
/// reported by the bridge as a [`BridgeError`] before the factory is ever
/// consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomQueryOutcome {
    /// The implementation produced an interface pointer.
    Handled(usize),
    NotHandled,
    /// The implementation redirected to another interface pointer.
    Redirected(usize),
}

/// Application-level collaborator supplying counterpart objects and
/// interface tables.
pub trait WrapperFactory: Send + Sync {
    /// Compute the external interface table for `instance`.
    ///
    /// Must be idempotent per object identity: repeat calls for the same
    /// object yield equivalent tables. That property is what permits the
    /// bridge to call this without holding any lock.
    fn compute_interfaces(
        &self,
        scenario: BridgeScenario,
        instance: &ManagedHandle,
        flags: CreateWrapperFlags,
    ) -> Result<InterfaceTable, CollaboratorStatus>;

    /// Create a managed counterpart for an external identity. `Ok(None)`
    /// is a legal outcome meaning no object was produced.
    fn create_object(
        &self,
        scenario: BridgeScenario,
        identity: ExternalIdentity,
        flags: CreateObjectFlags,
    ) -> Result<Option<ManagedHandle>, CollaboratorStatus>;

    /// Batch teardown of objects handed over by the thread-scoped bulk
    /// release.
    fn release_objects(&self, objects: Vec<ManagedHandle>);

    /// Dispatch a custom query-interface request to the application.
    fn custom_query_interface(
        &self,
        target: &ManagedHandle,
        interface: InterfaceId,
    ) -> CustomQueryOutcome;
}

static GLOBAL_FACTORY: OnceLock<Arc<dyn WrapperFactory>> = OnceLock::new();

/// Whether the global factory has been registered for marshaling use.
static MARSHALLING_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register the process-wide factory. First registration wins; a second
/// registration is rejected.
pub fn register_global(factory: Arc<dyn WrapperFactory>) -> Result<(), BridgeError> {
    GLOBAL_FACTORY
        .set(factory)
        .map_err(|_| BridgeError::InvalidArgument("a global wrapper factory is already registered"))
}

/// The registered global factory, if any.
pub fn global() -> Option<Arc<dyn WrapperFactory>> {
    GLOBAL_FACTORY.get().cloned()
}

/// Opt the registered global factory into the marshaling entry points.
pub fn set_marshalling_registered() {
    debug_assert!(
        !MARSHALLING_REGISTERED.load(Ordering::Acquire),
        "marshalling registration is one-shot"
    );
    MARSHALLING_REGISTERED.store(true, Ordering::Release);
}

pub fn is_marshalling_registered() -> bool {
    MARSHALLING_REGISTERED.load(Ordering::Acquire)
}

/// Resolve the factory for one call: the per-call override for `Instance`,
/// the registered global otherwise.
pub(crate) fn resolve(
    scenario: BridgeScenario,
    per_call: Option<&Arc<dyn WrapperFactory>>,
) -> Result<Arc<dyn WrapperFactory>, BridgeError> {
    match scenario {
        BridgeScenario::Instance => per_call.cloned().ok_or(BridgeError::InvalidArgument(
            "instance scenario requires a factory implementation",
        )),
        BridgeScenario::TrackerSupport | BridgeScenario::Marshalling => {
            debug_assert!(
                per_call.is_none(),
                "global scenarios use the registered factory"
            );
            global().ok_or(BridgeError::InvalidArgument(
                "no global wrapper factory registered",
            ))
        }
    }
}
