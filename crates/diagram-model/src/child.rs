// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only views of a parent repository restricted to a sub-graph.
//!
//! [`ChildModelRepository`] keeps a fixed sub-graph.
//! [`CalculatingChildModelRepository`] derives its sub-graph from a
//! [`ChildRepoSpec`] and recalculates it after the root changes.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::element::{Element, ElementKind, ElementReference};
use crate::error::ModelError;
use crate::filter::ChildRepoSpec;
use crate::graph::{RelationGraph, RelationTargetEdge};
use crate::query::{ElementQueryResult, GraphBasedModelRepository};
use crate::root::RootModelRepository;
use crate::time::VectorTimestamp;

/// Parent data seen through an owned sub-graph.
///
/// An element is visible iff its vertex is in the sub-graph and, for a
/// relation, every connector edge the parent has for it is too. The view
/// has no lock of its own; the sub-graph does not follow later parent
/// mutations.
#[derive(Debug)]
pub struct ChildModelRepository<'p, P> {
    parent: &'p P,
    graph: RelationGraph,
}

impl<'p, P: GraphBasedModelRepository> ChildModelRepository<'p, P> {
    /// View of `parent` restricted to `graph`.
    pub fn new(parent: &'p P, graph: RelationGraph) -> Self {
        Self { parent, graph }
    }

    /// The repository this view reads through.
    pub fn parent(&self) -> &'p P {
        self.parent
    }

    /// The backing sub-graph.
    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    /// Returns `true` if `id` is visible through this view.
    pub fn is_visible(&self, id: &str) -> bool {
        self.graph.contains_vertex(id)
            && self
                .parent
                .relation_target_edges(id)
                .iter()
                .all(|edge| self.graph.contains_edge(edge))
    }
}

impl<P: GraphBasedModelRepository> GraphBasedModelRepository for ChildModelRepository<'_, P> {
    fn with_graph<R>(&self, f: impl FnOnce(&RelationGraph) -> R) -> R {
        f(&self.graph)
    }

    fn element_reference(&self, id: &str) -> Option<ElementReference> {
        if !self.is_visible(id) {
            return None;
        }
        self.graph.vertex(id).cloned()
    }

    fn relation_target_edges(&self, id: &str) -> BTreeSet<RelationTargetEdge> {
        if !self.is_visible(id) {
            return BTreeSet::new();
        }
        self.parent.relation_target_edges(id)
    }

    fn get(&self, id: &str) -> Option<Element> {
        if !self.is_visible(id) {
            return None;
        }
        self.parent.get(id)
    }

    fn get_ref(&self, reference: &ElementReference) -> Result<Option<Element>, ModelError> {
        if !self.is_visible(reference.id()) {
            return Ok(None);
        }
        self.parent.get_ref(reference)
    }

    fn get_all(&self, kind: ElementKind) -> ElementQueryResult {
        self.parent.get_all(kind).filter_keys(|id| self.is_visible(id))
    }

    fn get_all_including_sub_kinds(&self, kind: ElementKind) -> ElementQueryResult {
        self.parent
            .get_all_including_sub_kinds(kind)
            .filter_keys(|id| self.is_visible(id))
    }

    fn get_version(&self, id: &str) -> Option<VectorTimestamp> {
        if !self.is_visible(id) {
            return None;
        }
        self.parent.get_version(id)
    }
}

static NEXT_VIEW: AtomicU64 = AtomicU64::new(0);

/// [`ChildRepoSpec`]-driven view of a [`RootModelRepository`] that follows its writes.
///
/// Construction registers a change listener on the root that only marks the
/// view dirty; the first read after that takes a fresh snapshot and applies
/// its filters again. Dropping the view unregisters the listener.
///
/// Reads lock the view before the root, and the listener never touches the
/// view lock, so reads may run concurrently with root writes.
pub struct CalculatingChildModelRepository<'p> {
    parent: &'p RootModelRepository,
    spec: ChildRepoSpec,
    key: String,
    dirty: Arc<AtomicBool>,
    view: Mutex<ChildModelRepository<'p, RootModelRepository>>,
}

impl std::fmt::Debug for CalculatingChildModelRepository<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatingChildModelRepository")
            .field("key", &self.key)
            .field("spec", &self.spec)
            .field("dirty", &self.dirty.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<'p> CalculatingChildModelRepository<'p> {
    /// View of `parent` filtered by `spec`.
    pub fn new(parent: &'p RootModelRepository, spec: ChildRepoSpec) -> Self {
        let key = format!("child-view-{}", NEXT_VIEW.fetch_add(1, Ordering::Relaxed));
        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        parent.add_on_change_listener(key.clone(), move |_| flag.store(true, Ordering::Release));
        let view = ChildModelRepository::new(parent, Self::calculate(parent, &spec));
        debug!(key = key.as_str(), "registered child view");
        Self {
            parent,
            spec,
            key,
            dirty,
            view: Mutex::new(view),
        }
    }

    fn calculate(parent: &RootModelRepository, spec: &ChildRepoSpec) -> RelationGraph {
        let mut graph = parent.graph_snapshot();
        spec.apply(&mut graph);
        graph
    }

    fn current(&self) -> MutexGuard<'_, ChildModelRepository<'p, RootModelRepository>> {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        // cleared before the snapshot so a write racing it marks the view again
        if self.dirty.swap(false, Ordering::AcqRel) {
            debug!(key = self.key.as_str(), "recalculating child view");
            *view = ChildModelRepository::new(self.parent, Self::calculate(self.parent, &self.spec));
        }
        view
    }

    /// The filters this view applies.
    pub fn spec(&self) -> &ChildRepoSpec {
        &self.spec
    }

    /// Copy of the sub-graph as of now.
    pub fn graph_snapshot(&self) -> RelationGraph {
        self.current().graph().clone()
    }

    /// Returns `true` if `id` is visible through this view.
    pub fn is_visible(&self, id: &str) -> bool {
        self.current().is_visible(id)
    }
}

impl Drop for CalculatingChildModelRepository<'_> {
    fn drop(&mut self) {
        self.parent.remove_on_change_listener(&self.key);
    }
}

impl GraphBasedModelRepository for CalculatingChildModelRepository<'_> {
    fn with_graph<R>(&self, f: impl FnOnce(&RelationGraph) -> R) -> R {
        self.current().with_graph(f)
    }

    fn element_reference(&self, id: &str) -> Option<ElementReference> {
        self.current().element_reference(id)
    }

    fn relation_target_edges(&self, id: &str) -> BTreeSet<RelationTargetEdge> {
        self.current().relation_target_edges(id)
    }

    fn get(&self, id: &str) -> Option<Element> {
        self.current().get(id)
    }

    fn get_ref(&self, reference: &ElementReference) -> Result<Option<Element>, ModelError> {
        self.current().get_ref(reference)
    }

    fn get_all(&self, kind: ElementKind) -> ElementQueryResult {
        self.current().get_all(kind)
    }

    fn get_all_including_sub_kinds(&self, kind: ElementKind) -> ElementQueryResult {
        self.current().get_all_including_sub_kinds(kind)
    }

    fn get_version(&self, id: &str) -> Option<VectorTimestamp> {
        self.current().get_version(id)
    }
}
