// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! diagram-model: versioned, graph-structured element store for collaborative
//! diagram editing.
//!
//! [`RootModelRepository`] is the single writable store. Writes return a
//! [`TimedDiffCollection`] describing the effective change, stamped with
//! [`VectorTimestamp`]s so replicas can merge each other's output. Relations
//! whose endpoints are not stored yet wait in a [`RelationCache`] and are
//! created retroactively once complete. Reads go through the
//! [`GraphBasedModelRepository`] trait, implemented by the root store, by
//! [`ChildModelRepository`] views restricted to a fixed sub-graph, and by
//! [`CalculatingChildModelRepository`] views that follow the root.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod child;
/// Repository configuration and its storage port.
pub mod config;
mod diff;
mod diff_collection;
mod element;
mod error;
mod filter;
mod graph;
mod query;
mod related;
mod relation_cache;
mod root;
mod time;
mod version;

/// Filtered read-only views.
pub use child::{CalculatingChildModelRepository, ChildModelRepository};
/// Config service types.
pub use config::{
    ConfigError, ConfigService, ConfigStore, FsConfigStore, MemoryConfigStore, RepositoryConfig,
};
pub use diff::ModelDiff;
/// Diff batches and their merge policies.
pub use diff_collection::{
    DiffCollection, MutableTimedDiffCollection, PreparedDiffCollection, TimedDiffCollection,
};
/// Element data model.
pub use element::{
    AttributeValue, Element, ElementKind, ElementReference, Probability, RelationEnds,
};
pub use error::{ErrorClass, ModelError};
/// Sub-graph filters for child views.
pub use filter::{ChildRepoSpec, FilterMode, SubGraphFilter};
/// Graph storage.
pub use graph::{connector_edges, RelationGraph, RelationTargetEdge, Side};
/// Query layer.
pub use query::{
    relation_ids, relation_ids_between, Direction, ElementQueryResult, GraphBasedModelRepository,
};
pub use related::RelatedElements;
pub use relation_cache::RelationCache;
pub use root::{ChangeListener, RootModelRepository};
/// Causal clocks.
pub use time::{compare, merge, CausalRelation, VectorTimestamp};
pub use version::VersionManager;
