// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end behaviour of the root store: idempotence, type stability,
//! deferred relations, endpoint immutability, cascading removal and queries.
#![allow(clippy::unwrap_used)]

mod common;

use common::{include, intersect, label, rect, rect_ref, repo, store_all, ts};
use diagram_model::{
    AttributeValue, DiffCollection, Element, ElementKind, ElementReference, ErrorClass,
    GraphBasedModelRepository, ModelDiff, ModelError,
};

// =============================================================================
// store
// =============================================================================

#[test]
fn storing_an_equivalent_element_is_a_no_op() {
    let repo = repo();
    let a = rect("a").with_attribute("w", AttributeValue::Double(4.0));
    repo.store(&a, None).unwrap();
    let version = repo.get_version("a");
    let clock = repo.clock();

    let again = repo.store(&a, None).unwrap();
    assert!(again.is_empty());
    assert_eq!(repo.get_version("a"), version);
    assert_eq!(repo.clock(), clock);
}

#[test]
fn modifying_an_element_yields_modify_with_both_states() {
    let repo = repo();
    let before = rect("a");
    repo.store(&before, None).unwrap();
    let after = before.clone().with_attribute("w", AttributeValue::Double(1.0));
    let diffs = repo.store(&after, None).unwrap();
    assert_eq!(
        diffs.diffs()["a"],
        ModelDiff::Modify {
            before,
            after: after.clone()
        }
    );
    assert_eq!(repo.get("a"), Some(after));
    assert_eq!(repo.get_version("a").unwrap().get(common::REPLICA), 2);
}

#[test]
fn changing_the_kind_of_an_id_is_rejected() {
    let repo = repo();
    repo.store(&rect("x"), None).unwrap();
    let err = repo.store(&label("x"), None).unwrap_err();
    assert!(matches!(err, ModelError::KindChanged { .. }));
    assert_eq!(err.class(), ErrorClass::InvalidState);
    assert_eq!(repo.get("x"), Some(rect("x")));
}

#[test]
fn returned_elements_are_independent_copies() {
    let repo = repo();
    repo.store(&rect("a"), None).unwrap();
    let mut copy = repo.get("a").unwrap();
    copy.set_attribute("w", AttributeValue::Double(9.0));
    assert_eq!(repo.get("a"), Some(rect("a")));
}

// =============================================================================
// deferred relations
// =============================================================================

#[test]
fn relation_is_deferred_until_all_endpoints_exist() {
    let repo = repo();
    let parked = repo.store(&include("r", "a", "b"), None).unwrap();
    assert!(parked.is_empty());
    assert!(repo.get("r").is_none());
    let original = repo.clock();

    assert!(!repo.store(&rect("b"), None).unwrap().contains_id("r"));
    let released = repo.store(&rect("a"), None).unwrap();

    assert!(released.contains_id("a"));
    assert!(matches!(released.diffs()["r"], ModelDiff::Add(_)));
    assert_eq!(released.get_version_for_element("r"), original);
    assert_eq!(repo.get_version("r"), Some(original));
    assert!(!repo.is_parked("r"));
}

#[test]
fn relation_on_relation_is_released_transitively() {
    let repo = repo();
    let r1 = include("r1", "a", "b");
    let meta = Element::one_to_one(
        "meta",
        ElementKind::ComponentOf,
        ElementReference::new("r1", ElementKind::Relation),
        rect_ref("c"),
        true,
    )
    .unwrap();

    store_all(&repo, &[meta, r1, rect("c"), rect("a")]);
    assert_eq!(repo.parked_count(), 2);

    let diffs = repo.store(&rect("b"), None).unwrap();
    assert_eq!(diffs.len(), 3);
    assert!(diffs.contains_id("r1") && diffs.contains_id("meta"));
    assert_eq!(repo.parked_count(), 0);
}

#[test]
fn explicit_timestamp_of_parked_relation_is_kept() {
    let repo = repo();
    let stamp = ts(&[("remote", 5)]);
    repo.store(&include("r", "a", "b"), Some(&stamp)).unwrap();
    store_all(&repo, &[rect("a")]);
    let diffs = repo.store(&rect("b"), None).unwrap();
    assert_eq!(diffs.get_version_for_element("r"), stamp);
}

// =============================================================================
// parked relations
// =============================================================================

#[test]
fn parked_relation_keeps_its_endpoints() {
    let repo = repo();
    store_all(&repo, &[rect("e2"), rect("e4"), include("r", "e0", "e0")]);
    assert!(repo.is_parked("r"));

    let err = repo.store(&include("r", "e2", "e2"), None).unwrap_err();
    assert_eq!(err, ModelError::RelationEndsChanged("r".into()));
    assert!(repo.is_parked("r"));
    assert!(repo.get("r").is_none());

    let diffs = repo.store(&rect("e0"), None).unwrap();
    let ModelDiff::Add(released) = &diffs.diffs()["r"] else {
        unreachable!("expected the parked relation to be added");
    };
    assert!(released.relation_ends().unwrap().a_set().contains(&rect_ref("e0")));
    assert!(!repo.is_parked("r"));
}

#[test]
fn parked_relation_keeps_its_kind() {
    let repo = repo();
    store_all(&repo, &[include("r", "a", "b")]);

    let err = repo.store(&intersect("r", "a", "b"), None).unwrap_err();
    assert!(matches!(err, ModelError::KindChanged { .. }));
    let err = repo.store(&rect("r"), None).unwrap_err();
    assert!(matches!(err, ModelError::KindChanged { .. }));
    assert!(!repo.contains("r"));
    assert!(repo.is_parked("r"));

    let diffs = repo.store(&rect("a"), None).unwrap();
    assert!(!diffs.contains_id("r"));
    let diffs = repo.store(&rect("b"), None).unwrap();
    assert_eq!(diffs.diffs()["r"].affected().kind(), ElementKind::Include);
}

#[test]
fn parked_relation_reports_its_version() {
    let repo = repo();
    store_all(&repo, &[include("local", "a", "b")]);
    assert_eq!(repo.get_version("local"), Some(repo.clock()));

    let stamp = ts(&[("remote", 5)]);
    repo.store(&include("remote", "a", "c"), Some(&stamp)).unwrap();
    assert_eq!(repo.get_version("remote"), Some(stamp));
    assert!(repo.get("remote").is_none());
}

#[test]
fn stale_store_of_parked_relation_is_rejected() {
    let repo = repo();
    let newer = ts(&[("remote", 5)]);
    repo.store(&include("r", "a", "b"), Some(&newer)).unwrap();

    let changed = include("r", "a", "b").with_attribute("w", AttributeValue::Double(1.0));
    let err = repo.store(&changed, Some(&ts(&[("remote", 3)]))).unwrap_err();
    assert!(err.is_stale_write());
    assert_eq!(repo.get_version("r"), Some(newer.clone()));

    store_all(&repo, &[rect("a"), rect("b")]);
    assert_eq!(repo.get("r"), Some(include("r", "a", "b")));
    assert_eq!(repo.get_version("r"), Some(newer));
}

#[test]
fn failing_release_rolls_back_the_whole_store() {
    let repo = repo();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = std::sync::Arc::clone(&seen);
    repo.add_on_change_listener("log", move |d: &ModelDiff| {
        log.lock().unwrap().push(d.id().to_owned());
    });

    // r stops waiting on x once x is stored, so removing x keeps r parked
    store_all(&repo, &[include("r", "x", "y"), rect("x")]);
    repo.remove("x", None).unwrap();
    store_all(&repo, &[label("x")]);
    let clock = repo.clock();
    let notified = seen.lock().unwrap().len();

    let err = repo.store(&rect("y"), None).unwrap_err();
    assert!(matches!(err, ModelError::KindMismatch { .. }));
    assert!(!repo.contains("y"));
    assert!(repo.get_version("y").is_none());
    assert!(repo.is_parked("r"));
    assert_eq!(repo.clock(), clock);
    assert_eq!(seen.lock().unwrap().len(), notified);
    assert!(repo.graph_snapshot().vertex("y").is_none());

    repo.remove("x", None).unwrap();
    store_all(&repo, &[rect("x")]);
    let diffs = repo.store(&rect("y"), None).unwrap();
    assert!(diffs.contains_id("y") && diffs.contains_id("r"));
    assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("r"));
}

// =============================================================================
// endpoint immutability
// =============================================================================

#[test]
fn directed_relation_endpoints_cannot_change() {
    let repo = repo();
    store_all(&repo, &[rect("x"), rect("y"), rect("z"), include("r", "x", "y")]);
    let moved = include("r", "x", "z");
    assert_eq!(
        repo.store(&moved, None).unwrap_err(),
        ModelError::RelationEndsChanged("r".into())
    );
    let reversed = include("r", "y", "x");
    assert!(repo.store(&reversed, None).is_err());
}

#[test]
fn undirected_relation_may_be_swapped() {
    let repo = repo();
    store_all(&repo, &[rect("x"), rect("y"), intersect("r", "x", "y")]);
    let swapped = repo.store(&intersect("r", "y", "x"), None).unwrap();
    assert!(swapped.is_empty());
}

#[test]
fn directedness_cannot_change() {
    let repo = repo();
    store_all(&repo, &[rect("x"), rect("y"), intersect("r", "x", "y")]);
    let directed =
        Element::one_to_one("r", ElementKind::Intersect, rect_ref("x"), rect_ref("y"), true)
            .unwrap();
    assert!(matches!(
        repo.store(&directed, None),
        Err(ModelError::RelationEndsChanged(_))
    ));
}

// =============================================================================
// remove
// =============================================================================

#[test]
fn removing_an_element_cascades_to_its_relations() {
    let repo = repo();
    let meta = Element::one_to_one(
        "meta",
        ElementKind::ComponentOf,
        ElementReference::new("r1", ElementKind::Include),
        rect_ref("d"),
        true,
    )
    .unwrap();
    store_all(
        &repo,
        &[
            rect("a"),
            rect("b"),
            rect("c"),
            rect("d"),
            include("r1", "a", "b"),
            intersect("r2", "c", "a"),
            include("r3", "b", "c"),
            meta,
        ],
    );
    let r1_version = repo.get_version("r1").unwrap();
    let top = ts(&[(common::REPLICA, 100)]);
    let removed = repo.remove("a", Some(&top));

    // explicit timestamp may not claim local events that never happened
    assert!(matches!(removed, Err(ModelError::ClockAhead { .. })));
    assert!(repo.contains("a"));

    let removed = repo.remove("a", None).unwrap();
    let ids: Vec<_> = removed.diffs().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["a", "meta", "r1", "r2"]);
    assert!(removed.iter().all(ModelDiff::is_remove));
    assert_eq!(removed.get_version_for_element("r1"), r1_version);
    assert!(repo.get("r3").is_some());
    assert!(repo.relations_adjacent_to_element("b").contains_id("r3"));
    assert_eq!(repo.relations_adjacent_to_element("b").len(), 1);
}

#[test]
fn removing_unknown_id_is_a_no_op() {
    let repo = repo();
    assert!(repo.remove("ghost", None).unwrap().is_empty());
}

#[test]
fn removing_with_stale_timestamp_is_rejected() {
    let repo = repo();
    repo.store(&rect("a"), Some(&ts(&[("remote", 3)]))).unwrap();
    let err = repo.remove("a", Some(&ts(&[("remote", 2)]))).unwrap_err();
    assert!(err.is_stale_write());
    assert!(repo.contains("a"));
}

#[test]
fn released_relation_parks_again_when_an_endpoint_vanished() {
    let repo = repo();
    store_all(&repo, &[rect("a"), include("r", "a", "b")]);
    let parked_at = repo.clock();
    repo.remove("a", None).unwrap();
    assert!(repo.is_parked("r"));

    store_all(&repo, &[rect("b")]);
    assert!(repo.is_parked("r"));
    assert!(repo.get("r").is_none());

    let diffs = repo.store(&rect("a"), None).unwrap();
    assert_eq!(diffs.get_version_for_element("r"), parked_at);
    assert!(repo.get("r").is_some());
}

#[test]
fn removing_a_parked_relation_discards_it() {
    let repo = repo();
    store_all(&repo, &[include("r", "a", "b")]);
    assert!(repo.remove("r", None).unwrap().is_empty());
    store_all(&repo, &[rect("a"), rect("b")]);
    assert!(repo.get("r").is_none());
    assert_eq!(repo.parked_count(), 0);
}

// =============================================================================
// dump / clear
// =============================================================================

#[test]
fn dump_reports_every_element_with_its_version() {
    let repo = repo();
    store_all(&repo, &[rect("a"), rect("b"), include("r", "a", "b")]);
    let dump = repo.dump();
    assert_eq!(dump.len(), 3);
    assert!(dump.iter().all(|d| matches!(d, ModelDiff::Add(_))));
    for id in ["a", "b", "r"] {
        assert_eq!(
            dump.get_version_for_element(id),
            repo.get_version(id).unwrap()
        );
    }
}

#[test]
fn clear_removes_everything() {
    let repo = repo();
    store_all(&repo, &[rect("a"), rect("b"), include("r", "a", "b")]);
    let cleared = repo.clear().unwrap();
    assert_eq!(cleared.len(), 3);
    assert!(repo.dump().is_empty());
    assert!(repo.graph_snapshot().vertices().next().is_none());
}

// =============================================================================
// queries
// =============================================================================

#[test]
fn between_elements_respects_direction() {
    let repo = repo();
    store_all(&repo, &[rect("a"), rect("b"), include("r", "a", "b")]);
    assert!(repo.relations_between_elements("a", "b").contains_id("r"));
    assert!(repo.relations_between_elements("b", "a").is_empty());
    assert!(repo
        .relations_between_elements_of_kind("a", "b", ElementKind::SpatialRelation, true)
        .contains_id("r"));
    assert!(repo
        .relations_between_elements_of_kind("a", "b", ElementKind::SpatialRelation, false)
        .is_empty());
}

#[test]
fn undirected_relations_are_found_both_ways() {
    let repo = repo();
    store_all(&repo, &[rect("a"), rect("b"), intersect("r", "a", "b")]);
    assert!(repo.relations_between_elements("a", "b").contains_id("r"));
    assert!(repo.relations_between_elements("b", "a").contains_id("r"));
    assert!(repo.relations_from_element("b").contains_id("r"));
    assert!(repo.relations_to_element("a").contains_id("r"));
}

#[test]
fn relation_is_not_adjacent_to_itself() {
    let repo = repo();
    store_all(&repo, &[rect("a"), rect("b"), include("r", "a", "b")]);
    assert!(repo.relations_adjacent_to_element("r").is_empty());
    assert!(repo.relations_adjacent_to_element("nope").is_empty());
}

#[test]
fn get_all_distinguishes_exact_and_sub_kinds() {
    let repo = repo();
    store_all(
        &repo,
        &[
            rect("a"),
            Element::new("rr", ElementKind::RoundedRectangle).unwrap(),
            label("l"),
        ],
    );
    assert_eq!(repo.get_all(ElementKind::Rectangle).len(), 1);
    assert_eq!(
        repo.get_all_including_sub_kinds(ElementKind::Rectangle).len(),
        2
    );
    assert_eq!(repo.get_all_including_sub_kinds(ElementKind::Shape).len(), 3);
    assert!(repo.get_all(ElementKind::Shape).is_empty());
}

#[test]
fn diff_lookup_by_reference_checks_kind() {
    let repo = repo();
    let diffs = repo.store(&rect("a"), None).unwrap();
    assert!(diffs
        .get_diff_for_element(&ElementReference::new("a", ElementKind::Shape))
        .unwrap()
        .is_some());
    assert!(diffs
        .get_diff_for_element(&ElementReference::new("a", ElementKind::Label))
        .is_err());
}
