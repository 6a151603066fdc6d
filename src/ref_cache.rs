//! Per-collection cache of conditional-liveness edges.
//!
//! An edge `source → target` means "if the source context's managed
//! object is proven live, treat the target as reachable too". The set is
//! purely derived data: reset and rebuilt once per qualifying collection,
//! never persisted across passes.

use std::sync::{Arc, Mutex};

use crate::context::ExternalObjectContext;
use crate::managed::ManagedHandle;

struct Edge {
    source: Arc<ExternalObjectContext>,
    target: ManagedHandle,
}

/// Edge set rebuilt by each reference-tracking pass.
pub struct RefCache {
    edges: Mutex<Vec<Edge>>,
}

impl RefCache {
    pub(crate) fn new() -> RefCache {
        RefCache {
            edges: Mutex::new(Vec::new()),
        }
    }

    /// Discard all edges from the previous pass.
    pub(crate) fn reset(&self) {
        let mut edges = self.edges.lock().expect("reference cache poisoned");
        let discarded = edges.len();
        edges.clear();
        if discarded != 0 {
            tracing::trace!("Reset reference cache ({} stale edges)", discarded);
        }
    }

    pub(crate) fn add_edge(&self, source: Arc<ExternalObjectContext>, target: ManagedHandle) {
        let mut edges = self.edges.lock().expect("reference cache poisoned");
        edges.push(Edge { source, target });
    }

    /// Drop edges whose source context is no longer live and return unused
    /// capacity to the allocator.
    pub(crate) fn compact(&self) {
        let mut edges = self.edges.lock().expect("reference cache poisoned");
        let before = edges.len();
        edges.retain(|e| e.source.is_active());
        edges.shrink_to_fit();
        if before != edges.len() {
            tracing::trace!("Compacted reference cache: {} -> {}", before, edges.len());
        }
    }

    /// Number of recorded edges.
    pub fn len(&self) -> usize {
        self.edges.lock().expect("reference cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialized `(source_object, target_object)` pairs for the
    /// collector to consume. Edges whose source died since recording are
    /// skipped.
    pub fn edges(&self) -> Vec<(ManagedHandle, ManagedHandle)> {
        let edges = self.edges.lock().expect("reference cache poisoned");
        edges
            .iter()
            .filter_map(|e| Some((e.source.managed_object()?, e.target.clone())))
            .collect()
    }
}
