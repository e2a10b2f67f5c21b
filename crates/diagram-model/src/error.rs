// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error type shared by every store operation.
use thiserror::Error;

use crate::element::{ElementKind, ElementReference};

/// Coarse classification of a [`ModelError`].
///
/// UI layers surface [`ErrorClass::InvalidState`] as defects and drop
/// [`ErrorClass::StaleWrite`] silently; stale writes are the expected outcome
/// of out-of-order delivery between replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Caller contract violation or data-integrity bug.
    InvalidState,
    /// A write carried a timestamp strictly older than the recorded version.
    StaleWrite,
}

/// Error returned by store, version and cache operations.
///
/// Unknown ids are never an error; reads report them as `None` or as an
/// empty result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// More than one element shares an id across distinct kinds.
    #[error("more than one element with id {id} found (kinds {kinds:?})")]
    DuplicateId {
        /// The shared id.
        id: String,
        /// Every kind the id is stored under.
        kinds: Vec<ElementKind>,
    },
    /// An element was re-stored with a different kind than its first version.
    #[error("element {id} was of kind {existing:?}, cannot replace it with kind {incoming:?}")]
    KindChanged {
        /// Element id.
        id: String,
        /// Kind of the stored element.
        existing: ElementKind,
        /// Kind of the rejected element.
        incoming: ElementKind,
    },
    /// A relation's endpoints or directedness differ from its first insertion.
    #[error("cannot change endpoints or directedness of relation {0} after first insertion")]
    RelationEndsChanged(String),
    /// A pending relation was re-parked with a different set of missing dependencies.
    #[error("relation {0} re-inserted into the relation cache with different missing elements")]
    MissingSetChanged(String),
    /// A reference's kind is incompatible with the element it points to.
    #[error("reference {reference} is incompatible with stored kind {actual:?}")]
    KindMismatch {
        /// The reference used for the lookup.
        reference: ElementReference,
        /// Runtime kind of the stored element.
        actual: ElementKind,
    },
    /// A reference cannot be widened to a kind that is not one of its supertypes.
    #[error("{reference} cannot be widened to {target:?}")]
    InvalidWidening {
        /// The reference being widened.
        reference: ElementReference,
        /// Requested kind.
        target: ElementKind,
    },
    /// Element construction violated a structural rule.
    #[error("invalid element {id}: {reason}")]
    InvalidElement {
        /// Element id.
        id: String,
        /// Rule that was violated.
        reason: &'static str,
    },
    /// A timestamp claims more local events than this replica has produced.
    #[error("timestamp for {id} is ahead of the local clock for own replica {replica}")]
    ClockAhead {
        /// Element id the timestamp was supplied for.
        id: String,
        /// The local replica id.
        replica: String,
    },
    /// A navigation helper expected at most one relation.
    #[error("expected 0 or 1 relations of kind {kind:?} at {id}, got {count}")]
    AmbiguousRelation {
        /// Element the navigation started from.
        id: String,
        /// Relation kind queried.
        kind: ElementKind,
        /// Number of matching relations.
        count: usize,
    },
    /// A navigation helper required a directed relation.
    #[error("relation {0} must be directed")]
    UndirectedRelation(String),
    /// Write rejected because its timestamp is strictly older than the stored version.
    #[error("current version of {0} is newer than the given timestamp")]
    StaleWrite(String),
}

impl ModelError {
    /// Classifies the error for propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StaleWrite(_) => ErrorClass::StaleWrite,
            _ => ErrorClass::InvalidState,
        }
    }

    /// Returns `true` for recoverable stale-write rejections.
    pub fn is_stale_write(&self) -> bool {
        self.class() == ErrorClass::StaleWrite
    }
}
