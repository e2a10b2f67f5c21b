// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single-hop navigation along directed relations.
use crate::element::{Element, ElementKind};
use crate::error::ModelError;
use crate::query::{ElementQueryResult, GraphBasedModelRepository};

/// Follows relations of one kind from an element to its counterparts.
#[derive(Debug)]
pub struct RelatedElements<'r, R> {
    repo: &'r R,
}

#[derive(Clone, Copy)]
enum Toward {
    B,
    A,
}

impl<'r, R: GraphBasedModelRepository> RelatedElements<'r, R> {
    /// Helpers reading through `repo`.
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// The B end of the single directed relation of `kind` leaving `id`.
    ///
    /// # Errors
    /// [`ModelError::AmbiguousRelation`] if more than one relation matches,
    /// [`ModelError::UndirectedRelation`] if the match is undirected.
    pub fn element_related_from(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> Result<Option<Element>, ModelError> {
        let relations = self
            .repo
            .relations_from_element_of_kind(id, kind, include_sub_kinds);
        self.single(id, kind, &relations, Toward::B)
    }

    /// The A end of the single directed relation of `kind` entering `id`.
    ///
    /// # Errors
    /// As for [`RelatedElements::element_related_from`].
    pub fn element_related_to(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> Result<Option<Element>, ModelError> {
        let relations = self
            .repo
            .relations_to_element_of_kind(id, kind, include_sub_kinds);
        self.single(id, kind, &relations, Toward::A)
    }

    /// B ends of every directed relation of `kind` leaving `id`.
    pub fn elements_related_from(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let relations = self
            .repo
            .relations_from_element_of_kind(id, kind, include_sub_kinds);
        self.collect(&relations, Toward::B)
    }

    /// A ends of every directed relation of `kind` entering `id`.
    pub fn elements_related_to(
        &self,
        id: &str,
        kind: ElementKind,
        include_sub_kinds: bool,
    ) -> ElementQueryResult {
        let relations = self
            .repo
            .relations_to_element_of_kind(id, kind, include_sub_kinds);
        self.collect(&relations, Toward::A)
    }

    fn single(
        &self,
        id: &str,
        kind: ElementKind,
        relations: &ElementQueryResult,
        toward: Toward,
    ) -> Result<Option<Element>, ModelError> {
        if relations.len() > 1 {
            return Err(ModelError::AmbiguousRelation {
                id: id.to_owned(),
                kind,
                count: relations.len(),
            });
        }
        let Some(relation) = relations.iter().next() else {
            return Ok(None);
        };
        let Some(ends) = relation.relation_ends() else {
            return Ok(None);
        };
        if !ends.is_directed() {
            return Err(ModelError::UndirectedRelation(relation.id().to_owned()));
        }
        let side = match toward {
            Toward::B => ends.b_set(),
            Toward::A => ends.a_set(),
        };
        Ok(side.iter().find_map(|r| self.repo.get(r.id())))
    }

    fn collect(&self, relations: &ElementQueryResult, toward: Toward) -> ElementQueryResult {
        relations
            .iter()
            .filter_map(Element::relation_ends)
            .filter(|ends| ends.is_directed())
            .flat_map(|ends| match toward {
                Toward::B => ends.b_set().iter(),
                Toward::A => ends.a_set().iter(),
            })
            .filter_map(|r| self.repo.get(r.id()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::element::ElementReference;
    use crate::root::RootModelRepository;

    fn rref(id: &str) -> ElementReference {
        ElementReference::new(id, ElementKind::Rectangle)
    }

    fn repo_with(ids: &[&str]) -> RootModelRepository {
        let repo = RootModelRepository::new("me");
        for id in ids {
            repo.store(&Element::new(*id, ElementKind::Rectangle).unwrap(), None)
                .unwrap();
        }
        repo
    }

    fn relate(repo: &RootModelRepository, id: &str, a: &str, b: &str, directed: bool) {
        let kind = if directed {
            ElementKind::Contains
        } else {
            ElementKind::Intersect
        };
        repo.store(&Element::one_to_one(id, kind, rref(a), rref(b), directed).unwrap(), None)
            .unwrap();
    }

    #[test]
    fn single_relation_resolves_to_its_counterpart() {
        let repo = repo_with(&["a", "b"]);
        relate(&repo, "r", "a", "b", true);
        let nav = RelatedElements::new(&repo);
        let b = nav
            .element_related_from("a", ElementKind::Relation, true)
            .unwrap()
            .unwrap();
        assert_eq!(b.id(), "b");
        let a = nav
            .element_related_to("b", ElementKind::Contains, false)
            .unwrap()
            .unwrap();
        assert_eq!(a.id(), "a");
        assert!(nav
            .element_related_from("b", ElementKind::Contains, false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn more_than_one_relation_is_ambiguous() {
        let repo = repo_with(&["a", "b", "c"]);
        relate(&repo, "r1", "a", "b", true);
        relate(&repo, "r2", "a", "c", true);
        let nav = RelatedElements::new(&repo);
        assert!(matches!(
            nav.element_related_from("a", ElementKind::Contains, false),
            Err(ModelError::AmbiguousRelation { count: 2, .. })
        ));
        let all = nav.elements_related_from("a", ElementKind::Contains, false);
        assert_eq!(all.ids().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn undirected_relation_is_rejected() {
        let repo = repo_with(&["a", "b"]);
        relate(&repo, "r", "a", "b", false);
        let nav = RelatedElements::new(&repo);
        assert_eq!(
            nav.element_related_from("a", ElementKind::Intersect, false),
            Err(ModelError::UndirectedRelation("r".into()))
        );
        assert!(nav
            .elements_related_to("b", ElementKind::Intersect, false)
            .is_empty());
    }
}
