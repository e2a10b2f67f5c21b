// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single state transition of one element.
use crate::element::{Element, ElementKind, ElementReference};
use crate::error::ModelError;

/// One Add, Modify or Remove of a single element.
#[derive(Clone, PartialEq, Debug)]
pub enum ModelDiff {
    /// The element did not exist before.
    Add(Element),
    /// The element changed from `before` to `after`.
    Modify {
        /// State prior to the change.
        before: Element,
        /// State after the change.
        after: Element,
    },
    /// The element was deleted; carries its last state.
    Remove(Element),
}

impl ModelDiff {
    /// Builds a Modify diff, rejecting pairs with different id or kind.
    pub fn modify(before: Element, after: Element) -> Result<Self, ModelError> {
        if before.id() != after.id() {
            return Err(ModelError::InvalidElement {
                id: after.id().to_owned(),
                reason: "modify diff must keep the element id",
            });
        }
        if before.kind() != after.kind() {
            return Err(ModelError::KindChanged {
                id: after.id().to_owned(),
                existing: before.kind(),
                incoming: after.kind(),
            });
        }
        Ok(Self::Modify { before, after })
    }

    /// The element this diff is about: the added, new, or removed state.
    pub fn affected(&self) -> &Element {
        match self {
            Self::Add(e) | Self::Remove(e) => e,
            Self::Modify { after, .. } => after,
        }
    }

    /// Id of the affected element.
    pub fn id(&self) -> &str {
        self.affected().id()
    }

    /// Runtime kind of the affected element.
    pub fn kind(&self) -> ElementKind {
        self.affected().kind()
    }

    /// Reference to the affected element.
    pub fn reference(&self) -> ElementReference {
        self.affected().reference()
    }

    /// Returns `true` for [`ModelDiff::Remove`].
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove(_))
    }
}
