// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Element, relation and reference types.
//!
//! Every unit of model data is an [`Element`] identified by an opaque string id
//! and tagged with an [`ElementKind`]. Relations are elements too: an element
//! whose kind descends from [`ElementKind::Relation`] carries [`RelationEnds`]
//! connecting two non-empty sets of [`ElementReference`]s.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ModelError;

/// Closed set of element kinds with a static single-inheritance hierarchy.
///
/// A kind is a *subkind* of itself and of every ancestor reachable through
/// [`ElementKind::parent`]. Abstract kinds (`Element`, `Shape`, `Relation`,
/// `SpatialRelation`) are valid declared kinds on references.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ElementKind {
    /// Root of the hierarchy.
    Element,
    /// Any drawable primitive.
    Shape,
    /// Axis-aligned rectangle.
    Rectangle,
    /// Rectangle with rounded corners.
    RoundedRectangle,
    /// Text label.
    Label,
    /// Polyline.
    Line,
    /// Single point.
    Point,
    /// Bag of user-defined attributes attached to other elements.
    AttributeBag,
    /// Root of all relation kinds.
    Relation,
    /// Geometric relation computed from shape positions.
    SpatialRelation,
    /// A fully contains B.
    Include,
    /// A and B overlap.
    Intersect,
    /// A and B do not touch.
    Disjoint,
    /// A lies right of B.
    RightOf,
    /// A lies below B.
    BottomOf,
    /// A is a component of composite B.
    ComponentOf,
    /// Semantic containment of B in A.
    Contains,
    /// Line A ends at element B.
    ConnectionEnd,
    /// Attribute bag A belongs to element B.
    AttributesFor,
}

impl ElementKind {
    /// Every kind, root first.
    pub const ALL: [ElementKind; 19] = [
        ElementKind::Element,
        ElementKind::Shape,
        ElementKind::Rectangle,
        ElementKind::RoundedRectangle,
        ElementKind::Label,
        ElementKind::Line,
        ElementKind::Point,
        ElementKind::AttributeBag,
        ElementKind::Relation,
        ElementKind::SpatialRelation,
        ElementKind::Include,
        ElementKind::Intersect,
        ElementKind::Disjoint,
        ElementKind::RightOf,
        ElementKind::BottomOf,
        ElementKind::ComponentOf,
        ElementKind::Contains,
        ElementKind::ConnectionEnd,
        ElementKind::AttributesFor,
    ];

    /// Direct supertype, `None` for [`ElementKind::Element`].
    pub fn parent(self) -> Option<ElementKind> {
        use ElementKind as K;
        match self {
            K::Element => None,
            K::Shape | K::AttributeBag | K::Relation => Some(K::Element),
            K::Rectangle | K::Label | K::Line | K::Point => Some(K::Shape),
            K::RoundedRectangle => Some(K::Rectangle),
            K::SpatialRelation
            | K::ComponentOf
            | K::Contains
            | K::ConnectionEnd
            | K::AttributesFor => Some(K::Relation),
            K::Include | K::Intersect | K::Disjoint | K::RightOf | K::BottomOf => {
                Some(K::SpatialRelation)
            }
        }
    }

    /// Returns `true` if `self` is `other` or one of its descendants.
    pub fn is_subkind_of(self, other: ElementKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Returns `true` for every kind descending from [`ElementKind::Relation`].
    pub fn is_relation(self) -> bool {
        self.is_subkind_of(ElementKind::Relation)
    }

    /// Returns `true` if `self` is exactly `other`, or a descendant when
    /// `include_sub_kinds` is set.
    pub fn matches(self, other: ElementKind, include_sub_kinds: bool) -> bool {
        self == other || (include_sub_kinds && self.is_subkind_of(other))
    }
}

/// Typed identity token: an element id paired with a declared kind.
///
/// Two references are equal iff id and declared kind match. A reference does
/// not own or pin the element it names.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ElementReference {
    id: String,
    kind: ElementKind,
}

impl ElementReference {
    /// Creates a reference to `id` declared as `kind`.
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Referenced element id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared kind.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Returns `true` if the declared kind is `kind` or one of its subkinds.
    pub fn references_kind(&self, kind: ElementKind) -> bool {
        self.kind.is_subkind_of(kind)
    }

    /// Statically widens this reference to the supertype `kind`.
    pub fn widen(&self, kind: ElementKind) -> Result<ElementReference, ModelError> {
        if !self.references_kind(kind) {
            return Err(ModelError::InvalidWidening {
                reference: self.clone(),
                target: kind,
            });
        }
        Ok(Self::new(self.id.clone(), kind))
    }
}

impl fmt::Display for ElementReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [\"{}\"]", self.kind, self.id)
    }
}

/// How confident the model is that an element is valid.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Probability {
    /// Asserted by a user.
    Explicit,
    /// Inferred by an algorithm with the given confidence in `[0, 1]`.
    Generated(f64),
}

impl Probability {
    /// Returns `true` for [`Probability::Explicit`].
    pub fn is_explicit(self) -> bool {
        matches!(self, Self::Explicit)
    }
}

/// Value of a single element attribute.
#[derive(Clone, PartialEq, Debug)]
pub enum AttributeValue {
    /// Free text.
    Text(String),
    /// Floating-point number.
    Double(f64),
    /// Flag.
    Boolean(bool),
    /// Name of one variant of a closed option set.
    Enum(String),
}

/// Endpoint sets and directedness of a relation.
///
/// Immutable once the relation is first stored, except that the sides of an
/// undirected relation may be swapped.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RelationEnds {
    a_set: BTreeSet<ElementReference>,
    b_set: BTreeSet<ElementReference>,
    directed: bool,
}

impl RelationEnds {
    /// The A side.
    pub fn a_set(&self) -> &BTreeSet<ElementReference> {
        &self.a_set
    }

    /// The B side.
    pub fn b_set(&self) -> &BTreeSet<ElementReference> {
        &self.b_set
    }

    /// Whether A and B are ordered.
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// All participants, A side first. A reference on both sides appears twice.
    pub fn participants(&self) -> impl Iterator<Item = &ElementReference> {
        self.a_set.iter().chain(self.b_set.iter())
    }

    /// Returns `true` if `other` has the same sides, or swapped sides when both
    /// relations are undirected.
    pub fn matches(&self, other: &RelationEnds) -> bool {
        if self.directed != other.directed {
            return false;
        }
        if self.a_set == other.a_set && self.b_set == other.b_set {
            return true;
        }
        !self.directed && self.a_set == other.b_set && self.b_set == other.a_set
    }
}

/// A uniquely identified, typed unit of model data.
///
/// Elements are plain values: the store clones them on every read and write,
/// so a returned element can be mutated freely without affecting the store.
#[derive(Clone, PartialEq, Debug)]
pub struct Element {
    id: String,
    kind: ElementKind,
    probability: Option<Probability>,
    attributes: BTreeMap<String, AttributeValue>,
    ends: Option<RelationEnds>,
}

impl Element {
    /// Creates a non-relation element.
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Result<Self, ModelError> {
        let id = id.into();
        if kind.is_relation() {
            return Err(ModelError::InvalidElement {
                id,
                reason: "relation kinds need endpoint sets",
            });
        }
        Ok(Self {
            id,
            kind,
            probability: None,
            attributes: BTreeMap::new(),
            ends: None,
        })
    }

    /// Creates a relation connecting `a_set` to `b_set`.
    pub fn relation(
        id: impl Into<String>,
        kind: ElementKind,
        a_set: impl IntoIterator<Item = ElementReference>,
        b_set: impl IntoIterator<Item = ElementReference>,
        directed: bool,
    ) -> Result<Self, ModelError> {
        let id = id.into();
        if !kind.is_relation() {
            return Err(ModelError::InvalidElement {
                id,
                reason: "endpoint sets are only allowed on relation kinds",
            });
        }
        let a_set: BTreeSet<_> = a_set.into_iter().collect();
        let b_set: BTreeSet<_> = b_set.into_iter().collect();
        if a_set.is_empty() || b_set.is_empty() {
            return Err(ModelError::InvalidElement {
                id,
                reason: "relation endpoint sets must not be empty",
            });
        }
        Ok(Self {
            id,
            kind,
            probability: None,
            attributes: BTreeMap::new(),
            ends: Some(RelationEnds {
                a_set,
                b_set,
                directed,
            }),
        })
    }

    /// Creates a relation with exactly one element on each side.
    pub fn one_to_one(
        id: impl Into<String>,
        kind: ElementKind,
        a: ElementReference,
        b: ElementReference,
        directed: bool,
    ) -> Result<Self, ModelError> {
        Self::relation(id, kind, [a], [b], directed)
    }

    /// Builder-style probability setter.
    pub fn with_probability(mut self, probability: Probability) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Element id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runtime kind.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Reference to this element under its runtime kind.
    pub fn reference(&self) -> ElementReference {
        ElementReference::new(self.id.clone(), self.kind)
    }

    /// Current probability, if any was assigned.
    pub fn probability(&self) -> Option<Probability> {
        self.probability
    }

    /// Replaces the probability.
    pub fn set_probability(&mut self, probability: Option<Probability>) {
        self.probability = probability;
    }

    /// All attributes in key order.
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Single attribute lookup.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Inserts or replaces an attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: AttributeValue,
    ) -> Option<AttributeValue> {
        self.attributes.insert(key.into(), value)
    }

    /// Removes an attribute, returning its value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    /// Endpoint information; `Some` iff the element is a relation.
    pub fn relation_ends(&self) -> Option<&RelationEnds> {
        self.ends.as_ref()
    }

    /// Returns `true` if this element is a relation.
    pub fn is_relation(&self) -> bool {
        self.ends.is_some()
    }

    /// Full value equality ignoring the id: probability and content.
    pub fn equivalent(&self, other: &Element) -> bool {
        self.probability == other.probability && self.content_equivalent(other)
    }

    /// Structural equality ignoring id and probability.
    ///
    /// Undirected relations are content-equivalent to their swapped form.
    pub fn content_equivalent(&self, other: &Element) -> bool {
        if self.kind != other.kind || self.attributes != other.attributes {
            return false;
        }
        match (&self.ends, &other.ends) {
            (None, None) => true,
            (Some(mine), Some(theirs)) => mine.matches(theirs),
            _ => false,
        }
    }
}
