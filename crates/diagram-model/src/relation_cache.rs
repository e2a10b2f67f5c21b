// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Holding area for relations whose endpoints are not stored yet.
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::element::{Element, ElementReference};
use crate::error::ModelError;
use crate::time::VectorTimestamp;

#[derive(Debug, Clone)]
struct PendingRelation {
    relation: Element,
    ts: VectorTimestamp,
    missing: BTreeSet<ElementReference>,
}

/// Relations that passed validation but wait on missing endpoints.
///
/// The reverse index is keyed by element id so that a dependency declared
/// under a supertype is satisfied by an element of any subkind.
#[derive(Debug, Clone, Default)]
pub struct RelationCache {
    pending: BTreeMap<String, PendingRelation>,
    // missing element id -> ids of relations waiting on it
    waiting: BTreeMap<String, BTreeSet<String>>,
}

impl RelationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parked relations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `true` if a relation with `id` is parked.
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Timestamp recorded by the last successful insert of `id`.
    pub fn version_of(&self, id: &str) -> Option<VectorTimestamp> {
        self.pending.get(id).map(|p| p.ts.clone())
    }

    /// The parked relation `id`, if any.
    pub fn parked(&self, id: &str) -> Option<&Element> {
        self.pending.get(id).map(|p| &p.relation)
    }

    /// Returns `true` if some parked relation waits on the element `id`.
    pub fn has_waiters(&self, id: &str) -> bool {
        self.waiting.contains_key(id)
    }

    /// References the parked relation `id` still waits on.
    pub fn missing_for(&self, id: &str) -> Option<BTreeSet<ElementReference>> {
        self.pending.get(id).map(|p| p.missing.clone())
    }

    /// Parks `relation` until every reference in `missing` is stored.
    ///
    /// Returns `Ok(false)` without changes if the relation is already parked
    /// with a newer timestamp.
    ///
    /// # Errors
    /// [`ModelError::KindChanged`] if the relation is already parked under
    /// another kind, [`ModelError::MissingSetChanged`] if it is already parked
    /// with a different set of missing references.
    pub fn insert_relation(
        &mut self,
        relation: &Element,
        ts: &VectorTimestamp,
        missing: BTreeSet<ElementReference>,
    ) -> Result<bool, ModelError> {
        let id = relation.id();
        if let Some(existing) = self.pending.get_mut(id) {
            if existing.relation.kind() != relation.kind() {
                return Err(ModelError::KindChanged {
                    id: id.to_owned(),
                    existing: existing.relation.kind(),
                    incoming: relation.kind(),
                });
            }
            if existing.missing != missing {
                return Err(ModelError::MissingSetChanged(id.to_owned()));
            }
            if ts.is_strictly_before(&existing.ts) {
                trace!(id, "parked relation already has a newer version");
                return Ok(false);
            }
            existing.relation = relation.clone();
            existing.ts = ts.clone();
            return Ok(true);
        }
        for dep in &missing {
            self.waiting
                .entry(dep.id().to_owned())
                .or_default()
                .insert(id.to_owned());
        }
        debug!(id, missing = missing.len(), "parking relation");
        self.pending.insert(
            id.to_owned(),
            PendingRelation {
                relation: relation.clone(),
                ts: ts.clone(),
                missing,
            },
        );
        Ok(true)
    }

    /// Marks `inserted` as stored and releases every relation that no longer
    /// waits on anything, paired with its original timestamp.
    ///
    /// A dependency is satisfied when its id matches and the inserted kind is
    /// the declared kind or one of its subkinds.
    pub fn on_element_insert(
        &mut self,
        inserted: &ElementReference,
    ) -> Vec<(Element, VectorTimestamp)> {
        let Some(waiters) = self.waiting.remove(inserted.id()) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        let mut still_waiting = BTreeSet::new();
        for relation_id in waiters {
            let Some(pending) = self.pending.get_mut(&relation_id) else {
                continue;
            };
            let before = pending.missing.len();
            pending
                .missing
                .retain(|dep| !(dep.id() == inserted.id() && inserted.references_kind(dep.kind())));
            if pending.missing.iter().any(|dep| dep.id() == inserted.id()) {
                still_waiting.insert(relation_id.clone());
            }
            if before != pending.missing.len() && pending.missing.is_empty() {
                if let Some(done) = self.pending.remove(&relation_id) {
                    debug!(id = relation_id.as_str(), "releasing parked relation");
                    ready.push((done.relation, done.ts));
                }
            }
        }
        if !still_waiting.is_empty() {
            self.waiting.insert(inserted.id().to_owned(), still_waiting);
        }
        ready
    }

    /// Drops the parked relation `id` alone; relations waiting on `id` stay.
    pub fn discard(&mut self, id: &str) -> Option<(Element, VectorTimestamp)> {
        let pending = self.pending.remove(id)?;
        for dep in &pending.missing {
            if let Some(set) = self.waiting.get_mut(dep.id()) {
                set.remove(id);
                if set.is_empty() {
                    self.waiting.remove(dep.id());
                }
            }
        }
        debug!(id, "discarding parked relation");
        Some((pending.relation, pending.ts))
    }

    /// Discards the parked relation `id` and every relation waiting on `id`.
    ///
    /// Returns the ids of the discarded relations.
    pub fn on_element_remove(&mut self, id: &str) -> Vec<String> {
        let mut doomed: BTreeSet<String> = self.waiting.remove(id).unwrap_or_default();
        if self.pending.contains_key(id) {
            doomed.insert(id.to_owned());
        }
        doomed
            .into_iter()
            .filter(|relation_id| self.discard(relation_id).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::element::ElementKind;

    fn ts(pairs: &[(&str, u64)]) -> VectorTimestamp {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn rect(id: &str) -> ElementReference {
        ElementReference::new(id, ElementKind::Rectangle)
    }

    fn include(id: &str, a: &str, b: &str) -> Element {
        Element::one_to_one(id, ElementKind::Include, rect(a), rect(b), true).unwrap()
    }

    #[test]
    fn releases_once_all_dependencies_arrive() {
        let mut cache = RelationCache::new();
        let r = include("r", "a", "b");
        let missing: BTreeSet<_> = [rect("a"), rect("b")].into();
        assert!(cache.insert_relation(&r, &ts(&[("x", 1)]), missing).unwrap());

        assert!(cache.on_element_insert(&rect("a")).is_empty());
        assert_eq!(cache.missing_for("r").unwrap().len(), 1);

        let ready = cache.on_element_insert(&ElementReference::new("b", ElementKind::RoundedRectangle));
        assert_eq!(ready, vec![(r, ts(&[("x", 1)]))]);
        assert!(cache.is_empty());
    }

    #[test]
    fn supertype_insert_does_not_satisfy_subtype_dependency() {
        let mut cache = RelationCache::new();
        let r = include("r", "a", "b");
        cache
            .insert_relation(&r, &ts(&[("x", 1)]), [rect("a")].into())
            .unwrap();
        assert!(cache
            .on_element_insert(&ElementReference::new("a", ElementKind::Shape))
            .is_empty());
        assert!(cache.contains("r"));
        assert_eq!(cache.on_element_insert(&rect("a")).len(), 1);
    }

    #[test]
    fn reinsert_checks_missing_set_and_timestamp() {
        let mut cache = RelationCache::new();
        let r = include("r", "a", "b");
        let missing: BTreeSet<_> = [rect("a")].into();
        cache
            .insert_relation(&r, &ts(&[("x", 2)]), missing.clone())
            .unwrap();

        assert!(!cache
            .insert_relation(&r, &ts(&[("x", 1)]), missing.clone())
            .unwrap());
        assert_eq!(cache.version_of("r"), Some(ts(&[("x", 2)])));

        assert!(cache
            .insert_relation(&r, &ts(&[("x", 3)]), missing)
            .unwrap());
        assert_eq!(cache.version_of("r"), Some(ts(&[("x", 3)])));

        let err = cache
            .insert_relation(&r, &ts(&[("x", 4)]), [rect("b")].into())
            .unwrap_err();
        assert_eq!(err, ModelError::MissingSetChanged("r".into()));
    }

    #[test]
    fn removal_discards_waiters_and_the_relation_itself() {
        let mut cache = RelationCache::new();
        cache
            .insert_relation(&include("r1", "a", "b"), &ts(&[("x", 1)]), [rect("a")].into())
            .unwrap();
        cache
            .insert_relation(
                &include("r2", "a", "c"),
                &ts(&[("x", 1)]),
                [rect("a"), rect("c")].into(),
            )
            .unwrap();
        cache
            .insert_relation(&include("r3", "d", "e"), &ts(&[("x", 1)]), [rect("d")].into())
            .unwrap();

        assert_eq!(cache.on_element_remove("a"), vec!["r1".to_owned(), "r2".to_owned()]);
        assert_eq!(cache.on_element_remove("r3"), vec!["r3".to_owned()]);
        assert!(cache.is_empty());
        assert!(cache.on_element_insert(&rect("c")).is_empty());
    }

    #[test]
    fn discard_keeps_relations_waiting_on_the_discarded_id() {
        let mut cache = RelationCache::new();
        let r1 = include("r1", "a", "b");
        cache
            .insert_relation(&r1, &ts(&[("x", 1)]), [rect("a")].into())
            .unwrap();
        let meta = Element::one_to_one(
            "m",
            ElementKind::Include,
            ElementReference::new("r1", ElementKind::Include),
            rect("c"),
            true,
        )
        .unwrap();
        cache
            .insert_relation(
                &meta,
                &ts(&[("x", 1)]),
                [ElementReference::new("r1", ElementKind::Include)].into(),
            )
            .unwrap();
        assert!(cache.has_waiters("r1"));

        assert_eq!(cache.discard("r1"), Some((r1, ts(&[("x", 1)]))));
        assert!(cache.parked("r1").is_none());
        assert!(!cache.has_waiters("a"));
        assert!(cache.has_waiters("r1"));
        assert!(cache.contains("m"));
        assert_eq!(cache.discard("r1"), None);
    }

    #[test]
    fn reparking_under_another_kind_is_rejected() {
        let mut cache = RelationCache::new();
        cache
            .insert_relation(&include("r", "a", "b"), &ts(&[("x", 1)]), [rect("a")].into())
            .unwrap();
        let other =
            Element::one_to_one("r", ElementKind::Intersect, rect("a"), rect("b"), false).unwrap();
        let err = cache
            .insert_relation(&other, &ts(&[("x", 2)]), [rect("a")].into())
            .unwrap_err();
        assert!(matches!(err, ModelError::KindChanged { .. }));
        assert_eq!(cache.parked("r").map(Element::kind), Some(ElementKind::Include));
    }
}
