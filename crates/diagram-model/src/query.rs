// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only query layer shared by the root store and its child views.
//!
//! Implementors provide element lookup and access to their graph; adjacency
//! queries are derived from those in the provided methods. Ids unknown to the
//! graph always produce empty results.
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::element::{Element, ElementKind, ElementReference};
use crate::error::ModelError;
use crate::graph::{RelationGraph, RelationTargetEdge};
use crate::time::VectorTimestamp;

/// Edge direction relative to a queried vertex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// Edges leaving the vertex.
    Outgoing,
    /// Edges entering the vertex.
    Incoming,
    /// Both.
    Both,
}

/// Owned elements keyed by id, as returned by every multi-element query.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct ElementQueryResult {
    elements: BTreeMap<String, Element>,
}

impl ElementQueryResult {
    /// Empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `element`, replacing any element with the same id.
    pub fn insert(&mut self, element: Element) {
        self.elements.insert(element.id().to_owned(), element);
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element with `id`.
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    /// Element named by `reference`.
    ///
    /// # Errors
    /// [`ModelError::KindMismatch`] if the id is present under a kind that is
    /// not the reference's declared kind or a subkind of it.
    pub fn get_ref(&self, reference: &ElementReference) -> Result<Option<&Element>, ModelError> {
        match self.elements.get(reference.id()) {
            Some(e) if !e.kind().is_subkind_of(reference.kind()) => Err(ModelError::KindMismatch {
                reference: reference.clone(),
                actual: e.kind(),
            }),
            found => Ok(found),
        }
    }

    /// Returns `true` if `id` is present.
    pub fn contains_id(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    /// Returns `true` if the referenced element is present with a compatible kind.
    pub fn contains_ref(&self, reference: &ElementReference) -> bool {
        matches!(self.get_ref(reference), Ok(Some(_)))
    }

    /// Ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Elements in id order.
    pub fn iter(&self) -> btree_map::Values<'_, String, Element> {
        self.elements.values()
    }

    /// Subset whose ids match `keep`.
    #[must_use]
    pub fn filter_keys(&self, mut keep: impl FnMut(&str) -> bool) -> Self {
        self.elements
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Subset whose elements match `keep`.
    #[must_use]
    pub fn filter_values(&self, mut keep: impl FnMut(&Element) -> bool) -> Self {
        self.elements
            .values()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }

    /// Underlying map.
    pub fn into_map(self) -> BTreeMap<String, Element> {
        self.elements
    }
}

impl FromIterator<Element> for ElementQueryResult {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        let mut result = Self::new();
        for e in iter {
            result.insert(e);
        }
        result
    }
}

impl IntoIterator for ElementQueryResult {
    type Item = Element;
    type IntoIter = btree_map::IntoValues<String, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_values()
    }
}

impl<'a> IntoIterator for &'a ElementQueryResult {
    type Item = &'a Element;
    type IntoIter = btree_map::Values<'a, String, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ids of relations wired to `id` in `direction`, excluding `id` itself.
pub fn relation_ids(graph: &RelationGraph, id: &str, direction: Direction) -> BTreeSet<String> {
    let out = graph.outgoing(id);
    let inc = graph.incoming(id);
    let edges: Box<dyn Iterator<Item = &RelationTargetEdge> + '_> = match direction {
        Direction::Outgoing => Box::new(out),
        Direction::Incoming => Box::new(inc),
        Direction::Both => Box::new(out.chain(inc)),
    };
    edges
        .map(|e| e.relation().id())
        .filter(|rel| *rel != id)
        .map(str::to_owned)
        .collect()
}

/// Ids of relations leaving `from` and entering `to`, excluding both ids.
pub fn relation_ids_between(graph: &RelationGraph, from: &str, to: &str) -> BTreeSet<String> {
    let leaving = relation_ids(graph, from, Direction::Outgoing);
    let entering = relation_ids(graph, to, Direction::Incoming);
    leaving
        .intersection(&entering)
        .cloned()
        .collect()
}

/// Read surface over an element store backed by a [`RelationGraph`].
///
/// Closures passed to [`GraphBasedModelRepository::with_graph`] must not call
/// back into the repository; implementations may hold a lock while the
/// closure runs.
pub trait GraphBasedModelRepository {
    /// Runs `f` against the graph visible through this repository.
    fn with_graph<R>(&self, f: impl FnOnce(&RelationGraph) -> R) -> R;

    /// Reference of the visible vertex `id`.
    fn element_reference(&self, id: &str) -> Option<ElementReference>;

    /// Every connector edge the relation `id` has in the backing store.
    ///
    /// Empty for non-relations and unknown ids.
    fn relation_target_edges(&self, id: &str) -> BTreeSet<RelationTargetEdge>;

    /// Copy of the visible element `id`.
    fn get(&self, id: &str) -> Option<Element>;

    /// Copy of the element named by `reference`.
    ///
    /// # Errors
    /// [`ModelError::KindMismatch`] if the stored kind is not the declared
    /// kind or one of its subkinds.
    fn get_ref(&self, reference: &ElementReference) -> Result<Option<Element>, ModelError>;

    /// Every visible element of exactly `kind`.
    fn get_all(&self, kind: ElementKind) -> ElementQueryResult;

    /// Every visible element of `kind` or a subkind.
    fn get_all_including_sub_kinds(&self, kind: ElementKind) -> ElementQueryResult;

    /// Current version of the visible element `id`.
    ///
    /// A root repository also answers for relations it holds parked.
    fn get_version(&self, id: &str) -> Option<VectorTimestamp>;

    /// Resolves relation ids to visible elements matching the kind filter.
    fn resolve_relations(
        &self,
        ids: BTreeSet<String>,
        kind: Option<(ElementKind, bool)>,
    ) -> ElementQueryResult {
        let mut result = ElementQueryResult::new();
        for id in ids {
            let Some(relation) = self.get(&id) else {
                trace!(id = id.as_str(), "relation not visible");
                continue;
            };
            if kind.is_none_or(|(k, sub)| relation.kind().matches(k, sub)) {
                result.insert(relation);
            }
        }
        result
    }

    /// Relations `id` participates in along `direction`.
    fn relations(&self, id: &str, direction: Direction) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids(g, id, direction));
        self.resolve_relations(ids, None)
    }

    /// Relations whose edges leave `id`.
    fn relations_from_element(&self, id: &str) -> ElementQueryResult {
        self.relations(id, Direction::Outgoing)
    }

    /// Relations whose edges enter `id`.
    fn relations_to_element(&self, id: &str) -> ElementQueryResult {
        self.relations(id, Direction::Incoming)
    }

    /// Relations touching `id` in either direction.
    fn relations_adjacent_to_element(&self, id: &str) -> ElementQueryResult {
        self.relations(id, Direction::Both)
    }

    /// [`GraphBasedModelRepository::relations_from_element`] restricted to `kind`.
    fn relations_from_element_of_kind(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids(g, id, Direction::Outgoing));
        self.resolve_relations(ids, Some((kind, include_sub_kinds)))
    }

    /// [`GraphBasedModelRepository::relations_to_element`] restricted to `kind`.
    fn relations_to_element_of_kind(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids(g, id, Direction::Incoming));
        self.resolve_relations(ids, Some((kind, include_sub_kinds)))
    }

    /// [`GraphBasedModelRepository::relations_adjacent_to_element`] restricted to `kind`.
    fn relations_adjacent_to_element_of_kind(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids(g, id, Direction::Both));
        self.resolve_relations(ids, Some((kind, include_sub_kinds)))
    }

    /// Relations leading from `from` to `to`.
    fn relations_between_elements(&self, from: &str, to: &str) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids_between(g, from, to));
        self.resolve_relations(ids, None)
    }

    /// [`GraphBasedModelRepository::relations_between_elements`] restricted to `kind`.
    fn relations_between_elements_of_kind(
        &self,
        from: &str,
        to: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let ids = self.with_graph(|g| relation_ids_between(g, from, to));
        self.resolve_relations(ids, Some((kind, include_sub_kinds)))
    }

    /// The element `id` plus, for relations, every participant, transitively
    /// through participants that are relations themselves.
    fn get_element_and_related(&self, id: &str) -> ElementQueryResult {
        let mut result = ElementQueryResult::new();
        let mut work = vec![id.to_owned()];
        while let Some(next) = work.pop() {
            if result.contains_id(&next) {
                continue;
            }
            let Some(element) = self.get(&next) else {
                continue;
            };
            if let Some(ends) = element.relation_ends() {
                work.extend(ends.participants().map(|p| p.id().to_owned()));
            }
            result.insert(element);
        }
        result
    }
}
