// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batches of [`ModelDiff`]s keyed by element id.
//!
//! Three shapes share one read surface ([`DiffCollection`]):
//!
//! - [`PreparedDiffCollection`]: untimed; derived work not yet applied.
//! - [`TimedDiffCollection`]: frozen diffs with the version each id reached.
//! - [`MutableTimedDiffCollection`]: builder with the two merge policies.
//!
//! Every collection holds at most one diff per id; later writes replace
//! earlier ones. An id may additionally be flagged as a *refresh*: the
//! receiver must re-read the element rather than apply the diff
//! incrementally.
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::diff::ModelDiff;
use crate::element::{ElementKind, ElementReference};
use crate::error::ModelError;
use crate::time::VectorTimestamp;

/// Shared read surface of every diff collection.
pub trait DiffCollection {
    /// All diffs keyed by element id.
    fn diffs(&self) -> &BTreeMap<String, ModelDiff>;

    /// Ids flagged as refresh.
    fn refreshes(&self) -> &BTreeSet<String>;

    /// Diffs in id order.
    fn iter(&self) -> btree_map::Values<'_, String, ModelDiff> {
        self.diffs().values()
    }

    /// Number of affected ids.
    fn len(&self) -> usize {
        self.diffs().len()
    }

    /// Returns `true` if nothing changed.
    fn is_empty(&self) -> bool {
        self.diffs().is_empty()
    }

    /// Returns `true` if the collection holds a diff for `id`.
    fn contains_id(&self, id: &str) -> bool {
        self.diffs().contains_key(id)
    }

    /// Returns `true` if `id` is flagged as refresh.
    fn is_refresh(&self, id: &str) -> bool {
        self.refreshes().contains(id)
    }

    /// Diff for the element named by `reference`.
    ///
    /// # Errors
    /// [`ModelError::KindMismatch`] if a diff exists for the id but its
    /// element is not of the reference's declared kind.
    fn get_diff_for_element(
        &self,
        reference: &ElementReference,
    ) -> Result<Option<&ModelDiff>, ModelError> {
        match self.diffs().get(reference.id()) {
            Some(diff) if !diff.kind().is_subkind_of(reference.kind()) => {
                Err(ModelError::KindMismatch {
                    reference: reference.clone(),
                    actual: diff.kind(),
                })
            }
            found => Ok(found),
        }
    }
}

fn keeps_kind(diff: &ModelDiff, kinds: &[ElementKind]) -> bool {
    kinds.iter().any(|k| diff.kind().is_subkind_of(*k))
}

fn retain_refreshes(refreshes: &BTreeSet<String>, diffs: &BTreeMap<String, ModelDiff>) -> BTreeSet<String> {
    refreshes
        .iter()
        .filter(|id| diffs.contains_key(*id))
        .cloned()
        .collect()
}

/// Untimed batch of diffs.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct PreparedDiffCollection {
    diffs: BTreeMap<String, ModelDiff>,
    refreshes: BTreeSet<String>,
}

impl PreparedDiffCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the diff for its element id.
    pub fn put_diff(&mut self, diff: ModelDiff) {
        self.diffs.insert(diff.id().to_owned(), diff);
    }

    /// Flags `id` as refresh.
    pub fn set_refresh(&mut self, id: impl Into<String>) {
        self.refreshes.insert(id.into());
    }

    /// New collection holding the diffs matching `keep`.
    #[must_use]
    pub fn filter(&self, mut keep: impl FnMut(&ModelDiff) -> bool) -> Self {
        let diffs: BTreeMap<_, _> = self
            .diffs
            .iter()
            .filter(|(_, d)| keep(d))
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();
        let refreshes = retain_refreshes(&self.refreshes, &diffs);
        Self { diffs, refreshes }
    }

    /// New collection holding diffs whose element is of one of `kinds` or a subkind.
    #[must_use]
    pub fn filter_by_element_kinds(&self, kinds: &[ElementKind]) -> Self {
        self.filter(|d| keeps_kind(d, kinds))
    }

    /// Builder seeded with these diffs and no versions.
    pub fn to_mutable(&self) -> MutableTimedDiffCollection {
        MutableTimedDiffCollection {
            inner: TimedDiffCollection {
                diffs: self.diffs.clone(),
                versions: BTreeMap::new(),
                refreshes: self.refreshes.clone(),
            },
        }
    }
}

impl DiffCollection for PreparedDiffCollection {
    fn diffs(&self) -> &BTreeMap<String, ModelDiff> {
        &self.diffs
    }

    fn refreshes(&self) -> &BTreeSet<String> {
        &self.refreshes
    }
}

/// Frozen batch of diffs with the version each id reached.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct TimedDiffCollection {
    diffs: BTreeMap<String, ModelDiff>,
    versions: BTreeMap<String, VectorTimestamp>,
    refreshes: BTreeSet<String>,
}

impl TimedDiffCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded versions keyed by id.
    pub fn versions(&self) -> &BTreeMap<String, VectorTimestamp> {
        &self.versions
    }

    /// Version recorded for `id`, or the empty timestamp.
    pub fn get_version_for_element(&self, id: &str) -> VectorTimestamp {
        self.versions.get(id).cloned().unwrap_or_default()
    }

    /// New collection holding the diffs matching `keep` and their versions.
    #[must_use]
    pub fn filter(&self, mut keep: impl FnMut(&ModelDiff) -> bool) -> Self {
        let diffs: BTreeMap<_, _> = self
            .diffs
            .iter()
            .filter(|(_, d)| keep(d))
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();
        let versions = self
            .versions
            .iter()
            .filter(|(id, _)| diffs.contains_key(*id))
            .map(|(id, ts)| (id.clone(), ts.clone()))
            .collect();
        let refreshes = retain_refreshes(&self.refreshes, &diffs);
        Self {
            diffs,
            versions,
            refreshes,
        }
    }

    /// New collection holding diffs whose element is of one of `kinds` or a subkind.
    #[must_use]
    pub fn filter_by_element_kinds(&self, kinds: &[ElementKind]) -> Self {
        self.filter(|d| keeps_kind(d, kinds))
    }

    /// Builder seeded with a copy of this collection.
    pub fn to_mutable(&self) -> MutableTimedDiffCollection {
        MutableTimedDiffCollection {
            inner: self.clone(),
        }
    }
}

impl DiffCollection for TimedDiffCollection {
    fn diffs(&self) -> &BTreeMap<String, ModelDiff> {
        &self.diffs
    }

    fn refreshes(&self) -> &BTreeSet<String> {
        &self.refreshes
    }
}

/// Builder for [`TimedDiffCollection`].
#[derive(Clone, Default, PartialEq, Debug)]
pub struct MutableTimedDiffCollection {
    inner: TimedDiffCollection,
}

impl MutableTimedDiffCollection {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the diff and version for the diff's element id.
    ///
    /// No ordering check is performed.
    pub fn put_diff(&mut self, diff: ModelDiff, ts: VectorTimestamp) {
        let id = diff.id().to_owned();
        self.inner.versions.insert(id.clone(), ts);
        self.inner.diffs.insert(id, diff);
    }

    /// Flags `id` as refresh.
    pub fn set_refresh(&mut self, id: impl Into<String>) {
        self.inner.refreshes.insert(id.into());
    }

    /// Version recorded for `id`, or the empty timestamp.
    pub fn get_version_for_element(&self, id: &str) -> VectorTimestamp {
        self.inner.get_version_for_element(id)
    }

    /// Read-only view of the collection built so far.
    pub fn as_timed(&self) -> &TimedDiffCollection {
        &self.inner
    }

    /// Overwrites every entry with the one from `other`, whatever its version.
    pub fn merge_collection(&mut self, other: &TimedDiffCollection) {
        for (id, diff) in &other.diffs {
            self.take_from(other, id, diff);
        }
    }

    /// Overwrites entries unless `other`'s version for the id is strictly
    /// older than the one recorded here.
    pub fn merge_newer_from(&mut self, other: &TimedDiffCollection) {
        for (id, diff) in &other.diffs {
            if let Some(current) = self.inner.versions.get(id) {
                if other.get_version_for_element(id).is_strictly_before(current) {
                    trace!(id = id.as_str(), "skipping older diff during merge");
                    continue;
                }
            }
            self.take_from(other, id, diff);
        }
    }

    fn take_from(&mut self, other: &TimedDiffCollection, id: &str, diff: &ModelDiff) {
        let replaces_remove = self.inner.diffs.get(id).is_some_and(ModelDiff::is_remove);
        if other.is_refresh(id) || (replaces_remove && !diff.is_remove()) {
            self.inner.refreshes.insert(id.to_owned());
        }
        match other.versions.get(id) {
            Some(ts) => {
                self.inner.versions.insert(id.to_owned(), ts.clone());
            }
            None => {
                self.inner.versions.remove(id);
            }
        }
        self.inner.diffs.insert(id.to_owned(), diff.clone());
    }

    /// Drops entries not matching `keep`.
    pub fn filter(&mut self, keep: impl FnMut(&ModelDiff) -> bool) {
        self.inner = self.inner.filter(keep);
    }

    /// Finishes the builder.
    pub fn freeze(self) -> TimedDiffCollection {
        self.inner
    }
}

impl DiffCollection for MutableTimedDiffCollection {
    fn diffs(&self) -> &BTreeMap<String, ModelDiff> {
        &self.inner.diffs
    }

    fn refreshes(&self) -> &BTreeSet<String> {
        &self.inner.refreshes
    }
}

impl From<MutableTimedDiffCollection> for TimedDiffCollection {
    fn from(value: MutableTimedDiffCollection) -> Self {
        value.freeze()
    }
}
