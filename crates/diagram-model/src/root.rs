// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The single writable element store.
//!
//! [`RootModelRepository`] owns the element table, the relation graph, the
//! [`RelationCache`] and the [`VersionManager`]. Every public operation takes
//! one exclusive lock for its whole duration; change listeners run while that
//! lock is held and must not call back into the same repository.
//!
//! A store either commits completely or not at all: listeners see its diffs
//! only after the element and every relation it released are in place.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, instrument, trace, warn};

use crate::child::{CalculatingChildModelRepository, ChildModelRepository};
use crate::config::RepositoryConfig;
use crate::diff::ModelDiff;
use crate::diff_collection::{MutableTimedDiffCollection, TimedDiffCollection};
use crate::element::{Element, ElementKind, ElementReference};
use crate::error::ModelError;
use crate::filter::ChildRepoSpec;
use crate::graph::{connector_edges, RelationGraph, RelationTargetEdge};
use crate::query::{ElementQueryResult, GraphBasedModelRepository};
use crate::relation_cache::RelationCache;
use crate::time::VectorTimestamp;
use crate::version::VersionManager;

/// Callback invoked with every diff the repository produces.
pub type ChangeListener = Arc<dyn Fn(&ModelDiff) + Send + Sync>;

struct RootState {
    // runtime kind -> id -> element
    table: BTreeMap<ElementKind, BTreeMap<String, Element>>,
    graph: RelationGraph,
    cache: RelationCache,
    versions: VersionManager,
    listeners: Vec<(String, ChangeListener)>,
}

// State restored when a released relation fails to store.
struct Checkpoint {
    table: BTreeMap<ElementKind, BTreeMap<String, Element>>,
    graph: RelationGraph,
    cache: RelationCache,
    versions: VersionManager,
}

impl RootState {
    fn new(replica_id: String) -> Self {
        Self {
            table: BTreeMap::new(),
            graph: RelationGraph::new(),
            cache: RelationCache::new(),
            versions: VersionManager::new(replica_id),
            listeners: Vec::new(),
        }
    }

    fn lookup(&self, id: &str) -> Result<Option<&Element>, ModelError> {
        let mut hits = self.table.values().filter_map(|by_id| by_id.get(id));
        let Some(first) = hits.next() else {
            return Ok(None);
        };
        let rest: Vec<ElementKind> = hits.map(Element::kind).collect();
        if rest.is_empty() {
            return Ok(Some(first));
        }
        let mut kinds = vec![first.kind()];
        kinds.extend(rest);
        Err(ModelError::DuplicateId {
            id: id.to_owned(),
            kinds,
        })
    }

    fn lookup_ref(&self, reference: &ElementReference) -> Result<Option<&Element>, ModelError> {
        match self.lookup(reference.id())? {
            Some(e) if !e.kind().is_subkind_of(reference.kind()) => Err(ModelError::KindMismatch {
                reference: reference.clone(),
                actual: e.kind(),
            }),
            found => Ok(found),
        }
    }

    fn take(&mut self, id: &str) -> Option<Element> {
        let kind = self
            .table
            .iter()
            .find_map(|(kind, by_id)| by_id.contains_key(id).then_some(*kind))?;
        let by_id = self.table.get_mut(&kind)?;
        let element = by_id.remove(id);
        if by_id.is_empty() {
            self.table.remove(&kind);
        }
        element
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.table.values().flat_map(BTreeMap::values)
    }

    fn notify(&self, diff: &ModelDiff) {
        for (key, listener) in &self.listeners {
            trace!(listener = key.as_str(), id = diff.id(), "dispatching diff");
            listener(diff);
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            table: self.table.clone(),
            graph: self.graph.clone(),
            cache: self.cache.clone(),
            versions: self.versions.clone(),
        }
    }

    fn restore(&mut self, saved: Checkpoint) {
        self.table = saved.table;
        self.graph = saved.graph;
        self.cache = saved.cache;
        self.versions = saved.versions;
    }

    fn store(
        &mut self,
        element: Element,
        ts: Option<VectorTimestamp>,
    ) -> Result<TimedDiffCollection, ModelError> {
        // only a release can fail after the first element is committed
        let mut checkpoint = self
            .cache
            .has_waiters(element.id())
            .then(|| self.checkpoint());
        let mut out = MutableTimedDiffCollection::new();
        let mut notices = Vec::new();
        let mut work = VecDeque::from([(element, ts)]);
        while let Some((next, stamp)) = work.pop_front() {
            match self.store_one(next, stamp, &mut out, &mut notices) {
                Ok(released) => work.extend(released.into_iter().map(|(r, t)| (r, Some(t)))),
                Err(err) => {
                    if let Some(saved) = checkpoint.take() {
                        warn!(%err, "released relation failed, rolling back store");
                        self.restore(saved);
                    }
                    return Err(err);
                }
            }
        }
        for diff in &notices {
            self.notify(diff);
        }
        Ok(out.freeze())
    }

    /// Stores one element and returns the parked relations it released.
    ///
    /// Every check runs before the first mutation, so an error leaves this
    /// element's state untouched.
    fn store_one(
        &mut self,
        mut element: Element,
        stamp: Option<VectorTimestamp>,
        out: &mut MutableTimedDiffCollection,
        notices: &mut Vec<ModelDiff>,
    ) -> Result<Vec<(Element, VectorTimestamp)>, ModelError> {
        let id = element.id().to_owned();
        let existing = self.lookup(&id)?.cloned();

        // a parked relation pins its id the same way a stored element does
        let pinned = existing.as_ref().or_else(|| self.cache.parked(&id));
        if let Some(old) = pinned {
            if old.kind() != element.kind() {
                return Err(ModelError::KindChanged {
                    id,
                    existing: old.kind(),
                    incoming: element.kind(),
                });
            }
            if let (Some(old_ends), Some(ends)) = (old.relation_ends(), element.relation_ends()) {
                if !old_ends.matches(ends) {
                    return Err(ModelError::RelationEndsChanged(id));
                }
            }
        }

        if let (None, Some(ends)) = (&existing, element.relation_ends()) {
            let mut missing = BTreeSet::new();
            for participant in ends.participants() {
                if self.lookup_ref(participant)?.is_none() {
                    missing.insert(participant.clone());
                }
            }
            if !missing.is_empty() {
                self.park(&element, stamp, missing)?;
                return Ok(Vec::new());
            }
        }

        if let Some(old) = &existing {
            if old.equivalent(&element) {
                trace!(id = id.as_str(), "store is a no-op");
                return Ok(Vec::new());
            }
            let keeps_explicit = old.probability().is_some_and(|p| p.is_explicit())
                && !element.probability().is_some_and(|p| p.is_explicit());
            if keeps_explicit {
                element.set_probability(old.probability());
                if old.equivalent(&element) {
                    trace!(id = id.as_str(), "store is a no-op after keeping explicit probability");
                    return Ok(Vec::new());
                }
            }
        }

        let version = match stamp {
            Some(ts) => {
                if self
                    .versions
                    .version_of(&id)
                    .or_else(|| self.cache.version_of(&id))
                    .is_some_and(|current| ts.is_strictly_before(&current))
                {
                    warn!(id = id.as_str(), "rejecting stale store");
                    return Err(ModelError::StaleWrite(id));
                }
                self.versions.update_version(&id, &ts)?;
                ts
            }
            None => {
                self.versions.register_local_event();
                self.versions.mark_element_updated(&id)
            }
        };

        let is_new = existing.is_none();
        if is_new {
            if self.cache.discard(&id).is_some() {
                debug!(id = id.as_str(), "parked relation stored directly");
            }
            self.graph.add_vertex(element.reference());
        }
        if element.is_relation() {
            for edge in self.graph.relation_edges(&id) {
                self.graph.remove_edge(&edge);
            }
            let graph = &self.graph;
            let edges = connector_edges(&element, |pid| graph.vertex(pid));
            for edge in edges {
                self.graph.add_edge(edge);
            }
        }
        self.table
            .entry(element.kind())
            .or_default()
            .insert(id.clone(), element.clone());

        let reference = element.reference();
        let diff = match existing {
            Some(before) => ModelDiff::Modify {
                before,
                after: element,
            },
            None => ModelDiff::Add(element),
        };
        debug!(id = id.as_str(), new = is_new, "stored element");
        out.put_diff(diff.clone(), version);
        notices.push(diff);

        if !is_new {
            return Ok(Vec::new());
        }
        Ok(self.cache.on_element_insert(&reference))
    }

    fn park(
        &mut self,
        relation: &Element,
        stamp: Option<VectorTimestamp>,
        missing: BTreeSet<ElementReference>,
    ) -> Result<(), ModelError> {
        let id = relation.id();
        if let Some(parked) = self.cache.missing_for(id) {
            if parked != missing {
                return Err(ModelError::MissingSetChanged(id.to_owned()));
            }
        }
        let ts = match stamp {
            Some(ts) => {
                if self
                    .cache
                    .version_of(id)
                    .is_some_and(|current| ts.is_strictly_before(&current))
                {
                    warn!(id, "rejecting stale store of parked relation");
                    return Err(ModelError::StaleWrite(id.to_owned()));
                }
                self.versions.observe(id, &ts)?;
                ts
            }
            None => self.versions.register_local_event(),
        };
        self.cache.insert_relation(relation, &ts, missing)?;
        Ok(())
    }

    fn remove(
        &mut self,
        id: &str,
        ts: Option<VectorTimestamp>,
    ) -> Result<TimedDiffCollection, ModelError> {
        if self.lookup(id)?.is_none() {
            if self.cache.contains(id) {
                self.cache.on_element_remove(id);
            }
            return Ok(TimedDiffCollection::new());
        }

        let top_stamp = match ts {
            Some(ts) => {
                if self
                    .versions
                    .version_of(id)
                    .is_some_and(|current| ts.is_strictly_before(&current))
                {
                    warn!(id, "rejecting stale remove");
                    return Err(ModelError::StaleWrite(id.to_owned()));
                }
                self.versions.observe(id, &ts)?;
                ts
            }
            None => self.versions.register_local_event(),
        };

        let mut out = MutableTimedDiffCollection::new();
        let mut stack = vec![(id.to_owned(), false)];
        let mut scheduled = BTreeSet::from([id.to_owned()]);
        while let Some((next, expanded)) = stack.pop() {
            if !expanded {
                stack.push((next.clone(), true));
                for relation in self.graph.adjacent_relation_ids(&next) {
                    if scheduled.insert(relation.clone()) {
                        stack.push((relation, false));
                    }
                }
                continue;
            }
            let stamp = if next == id {
                top_stamp.clone()
            } else {
                self.versions.version_of(&next).unwrap_or_default()
            };
            self.remove_one(&next, stamp, &mut out);
        }
        Ok(out.freeze())
    }

    fn remove_one(&mut self, id: &str, stamp: VectorTimestamp, out: &mut MutableTimedDiffCollection) {
        let Some(element) = self.take(id) else {
            return;
        };
        self.graph.remove_vertex(id);
        self.versions.on_remove(id);
        self.cache.on_element_remove(id);
        debug!(id, "removed element");
        let diff = ModelDiff::Remove(element);
        out.put_diff(diff.clone(), stamp);
        self.notify(&diff);
    }

    fn dump(&self) -> TimedDiffCollection {
        let mut out = MutableTimedDiffCollection::new();
        for element in self.elements() {
            let version = self.versions.version_of(element.id()).unwrap_or_default();
            out.put_diff(ModelDiff::Add(element.clone()), version);
        }
        out.freeze()
    }

    fn clear(&mut self) -> Result<TimedDiffCollection, ModelError> {
        let ids: Vec<String> = self.elements().map(|e| e.id().to_owned()).collect();
        let mut out = MutableTimedDiffCollection::new();
        for id in ids {
            let removed = self.remove(&id, None)?;
            out.merge_collection(&removed);
        }
        Ok(out.freeze())
    }

    fn refresh(&self, id: &str) -> TimedDiffCollection {
        let mut out = MutableTimedDiffCollection::new();
        let mut work = vec![id.to_owned()];
        let mut visited = BTreeSet::new();
        while let Some(next) = work.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            let element = match self.lookup(&next) {
                Ok(Some(e)) => e.clone(),
                Ok(None) => continue,
                Err(err) => {
                    warn!(id = next.as_str(), %err, "skipping element during refresh");
                    continue;
                }
            };
            let version = self.versions.version_of(&next).unwrap_or_default();
            out.put_diff(ModelDiff::Add(element), version);
            out.set_refresh(next.clone());
            work.extend(self.graph.adjacent_relation_ids(&next));
        }
        out.freeze()
    }
}

/// Writable, lock-guarded element store.
pub struct RootModelRepository {
    inner: Mutex<RootState>,
}

impl Default for RootModelRepository {
    fn default() -> Self {
        Self::from_config(&RepositoryConfig::default())
    }
}

impl std::fmt::Debug for RootModelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("RootModelRepository")
            .field("replica_id", &state.versions.replica_id())
            .field("vertices", &state.graph.vertex_count())
            .field("parked", &state.cache.len())
            .finish_non_exhaustive()
    }
}

impl RootModelRepository {
    /// Empty repository for the local replica `replica_id`.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(RootState::new(replica_id.into())),
        }
    }

    /// Empty repository configured by `config`.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(config.replica_id.clone())
    }

    fn state(&self) -> MutexGuard<'_, RootState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Id of the local replica.
    pub fn replica_id(&self) -> String {
        self.state().versions.replica_id().to_owned()
    }

    /// Copy of the local replica clock.
    pub fn clock(&self) -> VectorTimestamp {
        self.state().versions.clock()
    }

    /// Returns `true` if `id` is stored (parked relations excluded).
    pub fn contains(&self, id: &str) -> bool {
        matches!(self.state().lookup(id), Ok(Some(_)))
    }

    /// Returns `true` if the relation `id` is waiting on missing endpoints.
    pub fn is_parked(&self, id: &str) -> bool {
        self.state().cache.contains(id)
    }

    /// Number of relations waiting on missing endpoints.
    pub fn parked_count(&self) -> usize {
        self.state().cache.len()
    }

    /// Stores `element`, stamping it with `ts` or with a fresh local event.
    ///
    /// Relations with missing endpoints are parked and yield an empty diff
    /// until the endpoints arrive; they are then stored in the same call that
    /// completes them, with the timestamp they were parked with.
    ///
    /// Parked relation ids are held to the same rules as stored ones: the kind
    /// and the endpoints may not change. On error nothing is committed and no
    /// listener runs, including when a released relation is the one failing.
    ///
    /// # Errors
    /// [`ModelError::StaleWrite`] if `ts` is strictly older than the stored or
    /// parked version. Every other error is an invalid state: kind changes,
    /// relation endpoint changes, changed missing sets, a `ts` ahead of the
    /// local clock, or duplicate ids.
    #[instrument(skip(self, element, ts), fields(id = element.id()))]
    pub fn store(
        &self,
        element: &Element,
        ts: Option<&VectorTimestamp>,
    ) -> Result<TimedDiffCollection, ModelError> {
        self.state().store(element.clone(), ts.cloned())
    }

    /// Removes `id` and, first, every relation that transitively depends on it.
    ///
    /// `ts` stamps only the top-level Remove diff; cascaded removals carry
    /// their own last version. Unknown ids are a no-op.
    #[instrument(skip(self, ts))]
    pub fn remove(
        &self,
        id: &str,
        ts: Option<&VectorTimestamp>,
    ) -> Result<TimedDiffCollection, ModelError> {
        self.state().remove(id, ts.cloned())
    }

    /// One Add diff per stored element, each with its current version.
    pub fn dump(&self) -> TimedDiffCollection {
        self.state().dump()
    }

    /// Removes every element and returns the merged Remove diffs.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<TimedDiffCollection, ModelError> {
        self.state().clear()
    }

    /// Re-emits `id` and every relation transitively adjacent to it as Add
    /// diffs flagged refresh. Listeners are not notified.
    pub fn refresh(&self, id: &str) -> TimedDiffCollection {
        self.state().refresh(id)
    }

    /// Registers `listener` under `key`, replacing any listener with that key
    /// while keeping its dispatch position.
    pub fn add_on_change_listener(
        &self,
        key: impl Into<String>,
        listener: impl Fn(&ModelDiff) + Send + Sync + 'static,
    ) {
        let key = key.into();
        let listener: ChangeListener = Arc::new(listener);
        let mut state = self.state();
        if let Some(slot) = state.listeners.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = listener;
        } else {
            state.listeners.push((key, listener));
        }
    }

    /// Unregisters the listener under `key`; returns `false` if there was none.
    pub fn remove_on_change_listener(&self, key: &str) -> bool {
        let mut state = self.state();
        let before = state.listeners.len();
        state.listeners.retain(|(k, _)| k != key);
        state.listeners.len() != before
    }

    /// Copy of the current graph.
    pub fn graph_snapshot(&self) -> RelationGraph {
        self.state().graph.clone()
    }

    /// Read-only view restricted to `graph`.
    pub fn child(&self, graph: RelationGraph) -> ChildModelRepository<'_, Self> {
        ChildModelRepository::new(self, graph)
    }

    /// Live read-only view filtered by `spec`; it recalculates after every
    /// change to this repository.
    pub fn child_for_spec(&self, spec: &ChildRepoSpec) -> CalculatingChildModelRepository<'_> {
        CalculatingChildModelRepository::new(self, spec.clone())
    }
}

impl GraphBasedModelRepository for RootModelRepository {
    fn with_graph<R>(&self, f: impl FnOnce(&RelationGraph) -> R) -> R {
        f(&self.state().graph)
    }

    fn element_reference(&self, id: &str) -> Option<ElementReference> {
        self.state().graph.vertex(id).cloned()
    }

    fn relation_target_edges(&self, id: &str) -> BTreeSet<RelationTargetEdge> {
        self.state().graph.relation_edges(id)
    }

    fn get(&self, id: &str) -> Option<Element> {
        match self.state().lookup(id) {
            Ok(found) => found.cloned(),
            Err(err) => {
                warn!(id, %err, "lookup failed");
                None
            }
        }
    }

    fn get_ref(&self, reference: &ElementReference) -> Result<Option<Element>, ModelError> {
        Ok(self.state().lookup_ref(reference)?.cloned())
    }

    fn get_all(&self, kind: ElementKind) -> ElementQueryResult {
        self.state()
            .table
            .get(&kind)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get_all_including_sub_kinds(&self, kind: ElementKind) -> ElementQueryResult {
        self.state()
            .table
            .iter()
            .filter(|(k, _)| k.is_subkind_of(kind))
            .flat_map(|(_, by_id)| by_id.values().cloned())
            .collect()
    }

    fn get_version(&self, id: &str) -> Option<VectorTimestamp> {
        let state = self.state();
        state
            .versions
            .version_of(id)
            .or_else(|| state.cache.version_of(id))
    }
}
