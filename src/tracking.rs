//! Reference-tracking collaborator interface and collection-phase state.
//!
//! The tracking pass runs once per qualifying collection under a full
//! mutator pause: the bridge snapshots the global cache, hands the
//! collaborator an iterator over the contexts, and records every reported
//! boundary-crossing edge into the reference cache. The collaborator is
//! the only party that can see the external side of the graph; the bridge
//! supplies identity resolution and self-edge suppression.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::context::ExternalObjectContext;
use crate::managed::ManagedHandle;
use crate::ref_cache::RefCache;

/// Oldest generation the bridge cares about. Only collections condemning
/// at least this generation trigger a tracking pass.
pub const TRACKED_GENERATION: u32 = 2;

/// Nesting depth of in-progress collections, across all bridges. A depth
/// of zero means no collection is running; context state transitions are
/// gated on this.
static COLLECTION_DEPTH: AtomicU32 = AtomicU32::new(0);

pub(crate) fn enter_collection() {
    COLLECTION_DEPTH.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn leave_collection() {
    let prior = COLLECTION_DEPTH.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prior > 0, "collection finished without a matching start");
}

/// Whether any collection is currently in progress.
pub fn gc_in_progress() -> bool {
    COLLECTION_DEPTH.load(Ordering::SeqCst) > 0
}

/// Scoped collection marker for unit tests that exercise collector-only
/// transitions without a bridge.
#[cfg(test)]
pub(crate) fn test_collection_scope() -> TestCollectionScope {
    enter_collection();
    TestCollectionScope
}

#[cfg(test)]
pub(crate) struct TestCollectionScope;

#[cfg(test)]
impl Drop for TestCollectionScope {
    fn drop(&mut self) {
        leave_collection();
    }
}

/// Whether a reported edge was recorded or suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDisposition {
    Recorded,
    /// Source and target resolve to the same managed object; self-edges
    /// are never recorded.
    Suppressed,
}

/// Per-pass iteration and reporting surface handed to the collaborator.
///
/// Iteration order is unspecified. The session holds a snapshot taken
/// under the pause, so the collaborator may interleave `next` and
/// `report_edge` freely.
pub struct TrackingSession<'a> {
    contexts: Vec<Arc<ExternalObjectContext>>,
    position: usize,
    ref_cache: &'a RefCache,
}

impl<'a> TrackingSession<'a> {
    pub(crate) fn new(
        contexts: Vec<Arc<ExternalObjectContext>>,
        ref_cache: &'a RefCache,
    ) -> TrackingSession<'a> {
        TrackingSession {
            contexts,
            position: 0,
            ref_cache,
        }
    }

    /// Next context in the snapshot, or `None` at end of sequence.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Arc<ExternalObjectContext>> {
        let ctx = self.contexts.get(self.position)?.clone();
        self.position += 1;
        Some(ctx)
    }

    /// Record a conditional-liveness edge from `source`'s managed object
    /// to `target`: if the source is proven live, the target is treated
    /// as reachable too. Self-edges are suppressed.
    pub fn report_edge(
        &self,
        source: &Arc<ExternalObjectContext>,
        target: &ManagedHandle,
    ) -> EdgeDisposition {
        let Some(source_object) = source.managed_object() else {
            // The source died under a nested collection; nothing to do.
            return EdgeDisposition::Suppressed;
        };

        if source_object.same_object(target) {
            return EdgeDisposition::Suppressed;
        }

        tracing::trace!(
            "Found reference path: object {} => object {}",
            source_object.id(),
            target.id()
        );
        self.ref_cache.add_edge(source.clone(), target.clone());
        EdgeDisposition::Recorded
    }
}

/// Collaborator that enumerates boundary-crossing references during a
/// collector pause.
pub trait ReferenceTracking: Send + Sync {
    /// Walk the session's contexts and report every managed object
    /// reachable from each context's external side.
    fn begin_tracking(&self, session: &mut TrackingSession<'_>);

    /// Release transient per-pass state. Called exactly once per pass,
    /// after the condemned collection finishes.
    fn end_tracking(&self);
}
