// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sub-graph filters used to carve child views out of a graph snapshot.
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::element::{ElementKind, ElementReference};
use crate::graph::{RelationGraph, RelationTargetEdge, Side};

/// Whether a filter keeps or drops what it matches.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FilterMode {
    /// Keep only matching items.
    IncludeOnly,
    /// Drop matching items.
    Exclude,
}

impl FilterMode {
    fn removes(self, matches: bool) -> bool {
        (self == Self::IncludeOnly) != matches
    }
}

/// One criterion for shrinking a graph.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SubGraphFilter {
    /// Vertices whose kind is one of `kinds` (or a subkind).
    ///
    /// A relation loses its vertex when the relation itself is removed or
    /// when any of its participants is.
    ElementKinds {
        /// Keep or drop matches.
        mode: FilterMode,
        /// Kinds to match.
        kinds: Vec<ElementKind>,
    },
    /// Relations of `relation_kind` (or a subkind) whose participants all
    /// match the given kinds. A side with no kinds is not checked; with no
    /// kinds on either side the filter leaves the graph alone.
    RelationsWithEndpoints {
        /// Keep or drop matches.
        mode: FilterMode,
        /// Relation kind the filter applies to.
        relation_kind: ElementKind,
        /// Accepted kinds on the A side.
        a_kinds: Vec<ElementKind>,
        /// Accepted kinds on the B side.
        b_kinds: Vec<ElementKind>,
    },
    /// Drops one-to-one relations of `regarding` (or a subkind) that add
    /// nothing to reachability between their endpoints.
    ///
    /// The relations of that kind must form an acyclic graph; apply an
    /// [`SubGraphFilter::ElementKinds`] or
    /// [`SubGraphFilter::RelationsWithEndpoints`] filter first if they do not.
    /// Self-relations and relations with more than one element on a side are
    /// neither used nor removed.
    TransitiveReduction {
        /// Relation kind to reduce.
        regarding: ElementKind,
    },
}

fn matches_any(reference: &ElementReference, kinds: &[ElementKind]) -> bool {
    kinds.iter().any(|k| reference.references_kind(*k))
}

impl SubGraphFilter {
    /// Removes everything this filter rejects from `graph`.
    pub fn apply(&self, graph: &mut RelationGraph) {
        let doomed = match self {
            Self::ElementKinds { mode, kinds } => element_kinds_doomed(graph, *mode, kinds),
            Self::RelationsWithEndpoints {
                mode,
                relation_kind,
                a_kinds,
                b_kinds,
            } => endpoints_doomed(graph, *mode, *relation_kind, a_kinds, b_kinds),
            Self::TransitiveReduction { regarding } => reduction_doomed(graph, *regarding),
        };
        debug!(removed = doomed.len(), "applying sub-graph filter");
        for id in doomed {
            graph.remove_vertex(&id);
        }
    }
}

fn element_kinds_doomed(graph: &RelationGraph, mode: FilterMode, kinds: &[ElementKind]) -> BTreeSet<String> {
    let mut doomed: BTreeSet<String> = graph
        .vertices()
        .filter(|v| mode.removes(matches_any(v, kinds)))
        .map(|v| v.id().to_owned())
        .collect();
    let mut dropped_relations = BTreeSet::new();
    for edge in graph.edges() {
        if mode.removes(matches_any(edge.relation(), kinds))
            || doomed.contains(edge.from().id())
            || doomed.contains(edge.to().id())
        {
            dropped_relations.insert(edge.relation().id().to_owned());
        }
    }
    doomed.extend(dropped_relations);
    doomed
}

fn endpoints_doomed(
    graph: &RelationGraph,
    mode: FilterMode,
    relation_kind: ElementKind,
    a_kinds: &[ElementKind],
    b_kinds: &[ElementKind],
) -> BTreeSet<String> {
    if a_kinds.is_empty() && b_kinds.is_empty() {
        return BTreeSet::new();
    }
    let relations: BTreeSet<&ElementReference> = graph
        .edges()
        .map(|e| e.relation())
        .filter(|r| r.references_kind(relation_kind))
        .collect();
    let mut doomed = BTreeSet::new();
    for relation in relations {
        let matches = graph.relation_edges(relation.id()).iter().all(|edge| {
            let accepted = match edge.side() {
                Side::A => a_kinds,
                Side::B => b_kinds,
            };
            accepted.is_empty() || matches_any(edge.participant(), accepted)
        });
        if mode.removes(matches) {
            doomed.insert(relation.id().to_owned());
        }
    }
    doomed
}

fn single_participant(edges: &BTreeSet<RelationTargetEdge>, side: Side) -> Option<String> {
    let ids: BTreeSet<&str> = edges
        .iter()
        .filter(|e| e.side() == side)
        .map(|e| e.participant().id())
        .collect();
    match ids.into_iter().collect::<Vec<_>>().as_slice() {
        [only] => Some((*only).to_owned()),
        _ => None,
    }
}

// Hsu's transitive reduction over the endpoint pairs of `regarding` relations.
fn reduction_doomed(graph: &RelationGraph, regarding: ElementKind) -> BTreeSet<String> {
    let relations: BTreeSet<&ElementReference> = graph
        .edges()
        .map(RelationTargetEdge::relation)
        .filter(|r| r.references_kind(regarding))
        .collect();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    // (a, b) -> relations connecting a to b
    let mut pairs: BTreeMap<(usize, usize), Vec<String>> = BTreeMap::new();
    for relation in relations {
        let edges = graph.relation_edges(relation.id());
        let (Some(a), Some(b)) = (
            single_participant(&edges, Side::A),
            single_participant(&edges, Side::B),
        ) else {
            continue;
        };
        if a == b {
            continue;
        }
        let next = index.len();
        let a = *index.entry(a).or_insert(next);
        let next = index.len();
        let b = *index.entry(b).or_insert(next);
        pairs.entry((a, b)).or_default().push(relation.id().to_owned());
    }

    let n = index.len();
    let mut matrix = vec![vec![false; n]; n];
    for &(a, b) in pairs.keys() {
        matrix[a][b] = true;
    }
    // path matrix
    for i in 0..n {
        let reach_i = matrix[i].clone();
        for (j, row) in matrix.iter_mut().enumerate() {
            if j != i && row[i] {
                for (cell, reach) in row.iter_mut().zip(&reach_i) {
                    *cell |= *reach;
                }
            }
        }
    }
    // reduced matrix
    for j in 0..n {
        let reach_j = matrix[j].clone();
        for row in &mut matrix {
            if row[j] {
                for (cell, reach) in row.iter_mut().zip(&reach_j) {
                    if *reach {
                        *cell = false;
                    }
                }
            }
        }
    }

    pairs
        .into_iter()
        .filter(|((a, b), _)| !matrix[*a][*b])
        .flat_map(|(_, ids)| ids)
        .collect()
}

/// Ordered list of filters describing a child view.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ChildRepoSpec {
    filters: Vec<SubGraphFilter>,
}

impl ChildRepoSpec {
    /// No filters: the child sees the whole graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `filter`.
    pub fn with_filter(mut self, filter: SubGraphFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Appends an [`SubGraphFilter::ElementKinds`] filter.
    pub fn element_kinds(self, mode: FilterMode, kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        self.with_filter(SubGraphFilter::ElementKinds {
            mode,
            kinds: kinds.into_iter().collect(),
        })
    }

    /// Appends a [`SubGraphFilter::RelationsWithEndpoints`] filter.
    pub fn relations_with_endpoints(
        self,
        mode: FilterMode,
        relation_kind: ElementKind,
        a_kinds: impl IntoIterator<Item = ElementKind>,
        b_kinds: impl IntoIterator<Item = ElementKind>,
    ) -> Self {
        self.with_filter(SubGraphFilter::RelationsWithEndpoints {
            mode,
            relation_kind,
            a_kinds: a_kinds.into_iter().collect(),
            b_kinds: b_kinds.into_iter().collect(),
        })
    }

    /// Appends a [`SubGraphFilter::TransitiveReduction`] filter.
    pub fn transitive_reduction(self, regarding: ElementKind) -> Self {
        self.with_filter(SubGraphFilter::TransitiveReduction { regarding })
    }

    /// Filters in application order.
    pub fn filters(&self) -> &[SubGraphFilter] {
        &self.filters
    }

    /// Applies every filter to `graph` in order.
    pub fn apply(&self, graph: &mut RelationGraph) {
        for filter in &self.filters {
            filter.apply(graph);
        }
    }
}
