// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use diagram_model::{Element, ElementKind, ElementReference, RootModelRepository, VectorTimestamp};

/// Replica id used by every fixture repository.
pub const REPLICA: &str = "local";

pub fn repo() -> RootModelRepository {
    RootModelRepository::new(REPLICA)
}

pub fn rect(id: &str) -> Element {
    Element::new(id, ElementKind::Rectangle).unwrap()
}

pub fn rect_ref(id: &str) -> ElementReference {
    ElementReference::new(id, ElementKind::Rectangle)
}

pub fn label(id: &str) -> Element {
    Element::new(id, ElementKind::Label).unwrap()
}

/// Directed `Include` relation `a -> b` between rectangles.
pub fn include(id: &str, a: &str, b: &str) -> Element {
    Element::one_to_one(id, ElementKind::Include, rect_ref(a), rect_ref(b), true).unwrap()
}

/// Undirected `Intersect` relation between rectangles.
pub fn intersect(id: &str, a: &str, b: &str) -> Element {
    Element::one_to_one(id, ElementKind::Intersect, rect_ref(a), rect_ref(b), false).unwrap()
}

pub fn ts(pairs: &[(&str, u64)]) -> VectorTimestamp {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

/// Stores every element without an explicit timestamp.
pub fn store_all(repo: &RootModelRepository, elements: &[Element]) {
    for e in elements {
        repo.store(e, None).unwrap();
    }
}
