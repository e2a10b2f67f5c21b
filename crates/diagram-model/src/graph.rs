// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Directed multigraph of element vertices and relation connector edges.
//!
//! Every stored element, relations included, is a vertex. A relation is wired
//! to its participants by [`RelationTargetEdge`]s that all touch the
//! relation's own vertex, so relations can participate in other relations.
use std::collections::{BTreeMap, BTreeSet};

use crate::element::{Element, ElementReference};

/// Side of a relation a participant sits on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Side {
    /// The `a_set`.
    A,
    /// The `b_set`.
    B,
}

/// One connector edge between a participant and a relation vertex.
///
/// `reverse` is `false` for the edge following the relation's direction
/// (participant to relation on side A, relation to participant on side B) and
/// `true` for the extra edge undirected relations get on each side.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RelationTargetEdge {
    from: ElementReference,
    to: ElementReference,
    relation: ElementReference,
    side: Side,
    reverse: bool,
}

impl RelationTargetEdge {
    /// Creates an edge `from -> to` belonging to `relation`.
    pub fn new(
        from: ElementReference,
        to: ElementReference,
        relation: ElementReference,
        side: Side,
        reverse: bool,
    ) -> Self {
        Self {
            from,
            to,
            relation,
            side,
            reverse,
        }
    }

    /// Source vertex.
    pub fn from(&self) -> &ElementReference {
        &self.from
    }

    /// Target vertex.
    pub fn to(&self) -> &ElementReference {
        &self.to
    }

    /// Relation the edge belongs to.
    pub fn relation(&self) -> &ElementReference {
        &self.relation
    }

    /// Participant side.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Whether this is the extra edge of an undirected relation.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// The participant end (the end that is not the relation vertex).
    pub fn participant(&self) -> &ElementReference {
        if self.from.id() == self.relation.id() {
            &self.to
        } else {
            &self.from
        }
    }
}

/// Connector edges materializing `relation`, given the stored reference of
/// every participant id.
///
/// Participants missing from `resolve` are skipped; callers only wire
/// relations whose endpoints are all stored.
pub fn connector_edges<'a>(
    relation: &Element,
    resolve: impl Fn(&str) -> Option<&'a ElementReference>,
) -> Vec<RelationTargetEdge> {
    let Some(ends) = relation.relation_ends() else {
        return Vec::new();
    };
    let rel = relation.reference();
    let undirected = !ends.is_directed();
    let mut edges = Vec::new();
    for declared in ends.a_set() {
        let Some(p) = resolve(declared.id()) else {
            continue;
        };
        edges.push(RelationTargetEdge::new(p.clone(), rel.clone(), rel.clone(), Side::A, false));
        if undirected {
            edges.push(RelationTargetEdge::new(rel.clone(), p.clone(), rel.clone(), Side::A, true));
        }
    }
    for declared in ends.b_set() {
        let Some(p) = resolve(declared.id()) else {
            continue;
        };
        edges.push(RelationTargetEdge::new(rel.clone(), p.clone(), rel.clone(), Side::B, false));
        if undirected {
            edges.push(RelationTargetEdge::new(p.clone(), rel.clone(), rel.clone(), Side::B, true));
        }
    }
    edges
}

/// Adjacency-indexed multigraph keyed by element id.
///
/// Both buckets hold the same edges: `edges_from[v]` are the edges leaving
/// `v`, `edges_to[v]` those entering it. Edges only ever connect present
/// vertices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationGraph {
    vertices: BTreeMap<String, ElementReference>,
    edges_from: BTreeMap<String, BTreeSet<RelationTargetEdge>>,
    edges_to: BTreeMap<String, BTreeSet<RelationTargetEdge>>,
}

impl RelationGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges_from.values().map(BTreeSet::len).sum()
    }

    /// Vertices in id order.
    pub fn vertices(&self) -> impl Iterator<Item = &ElementReference> {
        self.vertices.values()
    }

    /// All edges, grouped by source id.
    pub fn edges(&self) -> impl Iterator<Item = &RelationTargetEdge> {
        self.edges_from.values().flatten()
    }

    /// Returns `true` if a vertex with `id` exists.
    pub fn contains_vertex(&self, id: &str) -> bool {
        self.vertices.contains_key(id)
    }

    /// Stored reference for `id`.
    pub fn vertex(&self, id: &str) -> Option<&ElementReference> {
        self.vertices.get(id)
    }

    /// Adds a vertex; returns `false` if the id was already present.
    pub fn add_vertex(&mut self, reference: ElementReference) -> bool {
        if self.vertices.contains_key(reference.id()) {
            return false;
        }
        self.vertices.insert(reference.id().to_owned(), reference);
        true
    }

    /// Removes a vertex and every incident edge, returning the removed edges.
    ///
    /// Returns `None` if the vertex was not present.
    pub fn remove_vertex(&mut self, id: &str) -> Option<Vec<RelationTargetEdge>> {
        self.vertices.remove(id)?;
        let mut removed = Vec::new();
        if let Some(out) = self.edges_from.remove(id) {
            for edge in out {
                let empty = self.edges_to.get_mut(edge.to.id()).map_or_else(
                    || {
                        debug_assert!(false, "edges_to bucket missing for {edge:?}");
                        false
                    },
                    |bucket| {
                        bucket.remove(&edge);
                        bucket.is_empty()
                    },
                );
                if empty {
                    self.edges_to.remove(edge.to.id());
                }
                removed.push(edge);
            }
        }
        if let Some(inbound) = self.edges_to.remove(id) {
            for edge in inbound {
                // self-loops were already handled with the outgoing bucket
                if edge.from.id() == id {
                    continue;
                }
                let empty = self.edges_from.get_mut(edge.from.id()).map_or_else(
                    || {
                        debug_assert!(false, "edges_from bucket missing for {edge:?}");
                        false
                    },
                    |bucket| {
                        bucket.remove(&edge);
                        bucket.is_empty()
                    },
                );
                if empty {
                    self.edges_from.remove(edge.from.id());
                }
                removed.push(edge);
            }
        }
        Some(removed)
    }

    /// Adds an edge between two present vertices; returns `false` if it was
    /// already present or an end is missing.
    pub fn add_edge(&mut self, edge: RelationTargetEdge) -> bool {
        if !self.contains_vertex(edge.from.id()) || !self.contains_vertex(edge.to.id()) {
            return false;
        }
        let inserted = self
            .edges_to
            .entry(edge.to.id().to_owned())
            .or_default()
            .insert(edge.clone());
        self.edges_from
            .entry(edge.from.id().to_owned())
            .or_default()
            .insert(edge);
        inserted
    }

    /// Returns `true` if `edge` is present.
    pub fn contains_edge(&self, edge: &RelationTargetEdge) -> bool {
        self.edges_from
            .get(edge.from.id())
            .is_some_and(|bucket| bucket.contains(edge))
    }

    /// Removes a single edge; returns `false` if it was not present.
    pub fn remove_edge(&mut self, edge: &RelationTargetEdge) -> bool {
        let Some(bucket) = self.edges_from.get_mut(edge.from.id()) else {
            return false;
        };
        if !bucket.remove(edge) {
            return false;
        }
        if bucket.is_empty() {
            self.edges_from.remove(edge.from.id());
        }
        let empty = self.edges_to.get_mut(edge.to.id()).map_or_else(
            || {
                debug_assert!(false, "edges_to bucket missing for {edge:?}");
                false
            },
            |bucket| {
                bucket.remove(edge);
                bucket.is_empty()
            },
        );
        if empty {
            self.edges_to.remove(edge.to.id());
        }
        true
    }

    /// Edges leaving `id`.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &RelationTargetEdge> {
        self.edges_from.get(id).into_iter().flatten()
    }

    /// Edges entering `id`.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &RelationTargetEdge> {
        self.edges_to.get(id).into_iter().flatten()
    }

    /// Edges touching `id` in either direction. A self-loop appears twice.
    pub fn edges_of(&self, id: &str) -> impl Iterator<Item = &RelationTargetEdge> {
        self.outgoing(id).chain(self.incoming(id))
    }

    /// Ids of relations, other than `id` itself, wired to the vertex `id`.
    pub fn adjacent_relation_ids(&self, id: &str) -> BTreeSet<String> {
        self.edges_of(id)
            .filter(|e| e.relation.id() != id)
            .map(|e| e.relation.id().to_owned())
            .collect()
    }

    /// Edges belonging to `relation_id`.
    pub fn relation_edges(&self, relation_id: &str) -> BTreeSet<RelationTargetEdge> {
        self.edges_of(relation_id)
            .filter(|e| e.relation.id() == relation_id)
            .cloned()
            .collect()
    }
}
