//! Shared mock collaborators for integration tests.
//!
//! `TestLifecycle` models the external side with token tables,
//! `TestFactory` counts calls and can be scripted to fail or decline,
//! and `TestTracker` replays a planned set of boundary edges.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use heapbridge::{
    BridgeScenario, CollaboratorStatus, ContextLifecycle, CreateObjectFlags, CreateWrapperFlags,
    CustomQueryOutcome, ExternalContextResult, ExternalContextToken, ExternalIdentity,
    ExternalObject, InterfaceId, InterfaceTable, ManagedHandle, ReferenceTracking,
    TrackingSession, WrapperActivity, WrapperFactory, WrapperHandle,
};

pub const STATUS_FAIL: CollaboratorStatus = CollaboratorStatus(0x8000_4005_u32 as i32);
pub const STATUS_INVALID_ARG: CollaboratorStatus = CollaboratorStatus(0x8007_0057_u32 as i32);

/// External handle whose canonical identity is its numeric id.
pub struct FakeExternal(pub usize);

impl ExternalObject for FakeExternal {
    fn canonical_identity(&self) -> Option<ExternalIdentity> {
        ExternalIdentity::from_raw(self.0)
    }
}

struct WrapperRecord {
    instance: ManagedHandle,
    active: bool,
    reactivations: usize,
}

struct ContextRecord {
    separated: bool,
}

#[derive(Default)]
struct LifecycleState {
    next_context_token: usize,
    next_wrapper: usize,
    contexts: HashMap<usize, ContextRecord>,
    wrappers: HashMap<usize, WrapperRecord>,
    tracker_identities: HashSet<usize>,
    // identity -> (unwrapped object, externally activated)
    unwrappable: HashMap<usize, (ManagedHandle, bool)>,
    contexts_created: usize,
    contexts_destroyed: usize,
    wrappers_created: usize,
    wrappers_destroyed: usize,
    separations: usize,
}

/// Table-backed lifecycle collaborator.
pub struct TestLifecycle {
    state: Mutex<LifecycleState>,
    context_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl TestLifecycle {
    pub fn new() -> Self {
        TestLifecycle {
            state: Mutex::new(LifecycleState {
                next_context_token: 1,
                next_wrapper: 1,
                ..LifecycleState::default()
            }),
            context_hook: Mutex::new(None),
        }
    }

    /// Run `hook` once, from inside the next `create_external_context`
    /// call. Lets a test interleave work into the unlocked window between
    /// lookup and publication.
    pub fn set_context_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.context_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Treat `identity` as coming from the reference-tracker support path.
    pub fn mark_tracker_identity(&self, identity: ExternalIdentity) {
        self.state
            .lock()
            .unwrap()
            .tracker_identities
            .insert(identity.as_usize());
    }

    /// Make `identity` unwrap to `object` (round-trip support).
    pub fn register_unwrap(&self, identity: ExternalIdentity, object: ManagedHandle, activated: bool) {
        self.state
            .lock()
            .unwrap()
            .unwrappable
            .insert(identity.as_usize(), (object, activated));
    }

    /// Simulate the external reference count of `wrapper` dropping to zero.
    pub fn deactivate_wrapper(&self, wrapper: WrapperHandle) {
        let mut state = self.state.lock().unwrap();
        state
            .wrappers
            .get_mut(&wrapper.as_usize())
            .expect("unknown wrapper")
            .active = false;
    }

    pub fn reactivation_count(&self, wrapper: WrapperHandle) -> usize {
        self.state.lock().unwrap().wrappers[&wrapper.as_usize()].reactivations
    }

    pub fn live_wrapper_count(&self) -> usize {
        self.state.lock().unwrap().wrappers.len()
    }

    pub fn contexts_created(&self) -> usize {
        self.state.lock().unwrap().contexts_created
    }

    pub fn contexts_destroyed(&self) -> usize {
        self.state.lock().unwrap().contexts_destroyed
    }

    pub fn wrappers_created(&self) -> usize {
        self.state.lock().unwrap().wrappers_created
    }

    pub fn wrappers_destroyed(&self) -> usize {
        self.state.lock().unwrap().wrappers_destroyed
    }

    pub fn separation_count(&self) -> usize {
        self.state.lock().unwrap().separations
    }
}

impl ContextLifecycle for TestLifecycle {
    fn create_external_context(
        &self,
        identity: ExternalIdentity,
        _flags: CreateObjectFlags,
    ) -> Result<ExternalContextResult, CollaboratorStatus> {
        let mut state = self.state.lock().unwrap();
        let token = state.next_context_token;
        state.next_context_token += 1;
        state.contexts.insert(token, ContextRecord { separated: false });
        state.contexts_created += 1;
        let from_tracker_runtime = state.tracker_identities.contains(&identity.as_usize());
        drop(state);

        if let Some(hook) = self.context_hook.lock().unwrap().take() {
            hook();
        }

        Ok(ExternalContextResult {
            token: ExternalContextToken::from_raw(token),
            from_tracker_runtime,
        })
    }

    fn destroy_context(&self, token: ExternalContextToken) {
        let mut state = self.state.lock().unwrap();
        let removed = state.contexts.remove(&token.as_usize());
        assert!(removed.is_some(), "double destroy of external context");
        state.contexts_destroyed += 1;
    }

    fn create_wrapper(
        &self,
        instance: ManagedHandle,
        table: InterfaceTable,
        _flags: CreateWrapperFlags,
    ) -> Result<WrapperHandle, CollaboratorStatus> {
        assert!(table.is_valid());
        let mut state = self.state.lock().unwrap();
        let raw = state.next_wrapper;
        state.next_wrapper += 1;
        state.wrappers.insert(
            raw,
            WrapperRecord {
                instance,
                active: true,
                reactivations: 0,
            },
        );
        state.wrappers_created += 1;
        Ok(WrapperHandle::from_raw(raw).unwrap())
    }

    fn destroy_wrapper(&self, wrapper: WrapperHandle) {
        let mut state = self.state.lock().unwrap();
        let removed = state.wrappers.remove(&wrapper.as_usize());
        assert!(removed.is_some(), "double destroy of wrapper");
        state.wrappers_destroyed += 1;
    }

    fn is_wrapper_active(
        &self,
        wrapper: WrapperHandle,
    ) -> Result<WrapperActivity, CollaboratorStatus> {
        let state = self.state.lock().unwrap();
        match state.wrappers.get(&wrapper.as_usize()) {
            Some(record) if record.active => Ok(WrapperActivity::Active),
            Some(_) => Ok(WrapperActivity::Inactive),
            None => Err(STATUS_INVALID_ARG),
        }
    }

    fn reactivate_wrapper(
        &self,
        wrapper: WrapperHandle,
        instance: ManagedHandle,
    ) -> Result<(), CollaboratorStatus> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .wrappers
            .get_mut(&wrapper.as_usize())
            .ok_or(STATUS_INVALID_ARG)?;
        assert!(record.instance.same_object(&instance));
        record.active = true;
        record.reactivations += 1;
        Ok(())
    }

    fn mark_externally_activated(&self, wrapper: WrapperHandle) -> Result<(), CollaboratorStatus> {
        let state = self.state.lock().unwrap();
        if state.wrappers.contains_key(&wrapper.as_usize()) {
            Ok(())
        } else {
            Err(STATUS_INVALID_ARG)
        }
    }

    fn managed_object_for_wrapper(&self, identity: ExternalIdentity) -> Option<ManagedHandle> {
        let state = self.state.lock().unwrap();
        state
            .unwrappable
            .get(&identity.as_usize())
            .map(|(object, _)| object.clone())
    }

    fn is_externally_activated(&self, identity: ExternalIdentity) -> bool {
        let state = self.state.lock().unwrap();
        state
            .unwrappable
            .get(&identity.as_usize())
            .is_some_and(|(_, activated)| *activated)
    }

    fn separate_from_tracker(&self, token: ExternalContextToken) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.contexts.get_mut(&token.as_usize()) {
            if !record.separated {
                record.separated = true;
                state.separations += 1;
            }
        }
    }
}

/// Counting, scriptable wrapper factory.
pub struct TestFactory {
    compute_calls: AtomicUsize,
    create_calls: AtomicUsize,
    fail_compute: AtomicBool,
    invalid_table: AtomicBool,
    fail_create: AtomicBool,
    decline_create: AtomicBool,
    released: Mutex<Vec<ManagedHandle>>,
    qi_handled: Mutex<HashMap<InterfaceId, usize>>,
}

impl TestFactory {
    pub fn new() -> Self {
        TestFactory {
            compute_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            fail_compute: AtomicBool::new(false),
            invalid_table: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            decline_create: AtomicBool::new(false),
            released: Mutex::new(Vec::new()),
            qi_handled: Mutex::new(HashMap::new()),
        }
    }

    pub fn compute_calls(&self) -> usize {
        self.compute_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fail_compute(&self) {
        self.fail_compute.store(true, Ordering::SeqCst);
    }

    /// Report interface entries without backing storage.
    pub fn produce_invalid_table(&self) {
        self.invalid_table.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Decline to produce managed objects (a legal `None` outcome).
    pub fn decline_create(&self) {
        self.decline_create.store(true, Ordering::SeqCst);
    }

    pub fn handle_interface(&self, interface: InterfaceId, pointer: usize) {
        self.qi_handled.lock().unwrap().insert(interface, pointer);
    }

    pub fn released(&self) -> Vec<ManagedHandle> {
        self.released.lock().unwrap().clone()
    }
}

impl WrapperFactory for TestFactory {
    fn compute_interfaces(
        &self,
        _scenario: BridgeScenario,
        _instance: &ManagedHandle,
        _flags: CreateWrapperFlags,
    ) -> Result<InterfaceTable, CollaboratorStatus> {
        self.compute_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_compute.load(Ordering::SeqCst) {
            return Err(STATUS_FAIL);
        }
        if self.invalid_table.load(Ordering::SeqCst) {
            return Ok(InterfaceTable { entries: 0, count: 3 });
        }
        Ok(InterfaceTable { entries: 0x1000, count: 2 })
    }

    fn create_object(
        &self,
        _scenario: BridgeScenario,
        _identity: ExternalIdentity,
        _flags: CreateObjectFlags,
    ) -> Result<Option<ManagedHandle>, CollaboratorStatus> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(STATUS_FAIL);
        }
        if self.decline_create.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(ManagedHandle::new()))
    }

    fn release_objects(&self, objects: Vec<ManagedHandle>) {
        self.released.lock().unwrap().extend(objects);
    }

    fn custom_query_interface(
        &self,
        _target: &ManagedHandle,
        interface: InterfaceId,
    ) -> CustomQueryOutcome {
        match self.qi_handled.lock().unwrap().get(&interface) {
            Some(pointer) => CustomQueryOutcome::Handled(*pointer),
            None => CustomQueryOutcome::NotHandled,
        }
    }
}

/// Tracker that replays planned edges keyed by source identity.
pub struct TestTracker {
    begin_calls: AtomicUsize,
    end_calls: AtomicUsize,
    recorded: AtomicUsize,
    suppressed: AtomicUsize,
    planned: Mutex<Vec<(ExternalIdentity, ManagedHandle)>>,
}

impl TestTracker {
    pub fn new() -> Self {
        TestTracker {
            begin_calls: AtomicUsize::new(0),
            end_calls: AtomicUsize::new(0),
            recorded: AtomicUsize::new(0),
            suppressed: AtomicUsize::new(0),
            planned: Mutex::new(Vec::new()),
        }
    }

    /// Plan an edge from the context for `source` to `target`.
    pub fn plan_edge(&self, source: ExternalIdentity, target: ManagedHandle) {
        self.planned.lock().unwrap().push((source, target));
    }

    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::SeqCst)
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed.load(Ordering::SeqCst)
    }
}

impl ReferenceTracking for TestTracker {
    fn begin_tracking(&self, session: &mut TrackingSession<'_>) {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        let planned = self.planned.lock().unwrap().clone();
        while let Some(context) = session.next() {
            for (source, target) in &planned {
                if *source != context.identity() {
                    continue;
                }
                match session.report_edge(&context, target) {
                    heapbridge::EdgeDisposition::Recorded => {
                        self.recorded.fetch_add(1, Ordering::SeqCst);
                    }
                    heapbridge::EdgeDisposition::Suppressed => {
                        self.suppressed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    fn end_tracking(&self) {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
    }
}
