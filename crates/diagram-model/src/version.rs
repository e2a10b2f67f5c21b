// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-element version table and the local replica clock.
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::ModelError;
use crate::time::{CausalRelation, VectorTimestamp};

/// Tracks the current [`VectorTimestamp`] of every element and the clock of
/// the local replica.
///
/// Every timestamp handed out is an owned copy; the manager never exposes its
/// internal state by reference.
#[derive(Debug, Clone)]
pub struct VersionManager {
    replica_id: String,
    clock: VectorTimestamp,
    versions: FxHashMap<String, VectorTimestamp>,
}

impl VersionManager {
    /// Creates a manager for the replica `replica_id` with an empty clock.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
            clock: VectorTimestamp::new(),
            versions: FxHashMap::default(),
        }
    }

    /// Id of the local replica.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Copy of the local clock.
    pub fn clock(&self) -> VectorTimestamp {
        self.clock.clone()
    }

    /// Current version of `id`, if recorded.
    pub fn version_of(&self, id: &str) -> Option<VectorTimestamp> {
        self.versions.get(id).cloned()
    }

    /// Relation of the current version of `id` to `ts`.
    ///
    /// An element without a recorded version is treated as strictly older
    /// than any timestamp.
    pub fn relation_of_current_version_to(&self, id: &str, ts: &VectorTimestamp) -> CausalRelation {
        self.versions
            .get(id)
            .map_or(CausalRelation::StrictlyBefore, |current| {
                current.relation_to(ts)
            })
    }

    /// Records `ts` as the version of `id`.
    ///
    /// Returns `Ok(false)` without touching any state when `ts` is strictly
    /// older than the recorded version. Foreign components of `ts` are folded
    /// into the local clock.
    ///
    /// # Errors
    /// [`ModelError::ClockAhead`] if `ts` carries more local events than this
    /// replica has produced.
    pub fn update_version(&mut self, id: &str, ts: &VectorTimestamp) -> Result<bool, ModelError> {
        self.check_clock(id, ts)?;
        if let Some(current) = self.versions.get(id) {
            if ts.is_strictly_before(current) {
                warn!(id, "rejecting version strictly older than the recorded one");
                return Ok(false);
            }
        }
        self.clock = self.clock.merge(ts);
        self.versions.insert(id.to_owned(), ts.clone());
        Ok(true)
    }

    /// Folds `ts` into the local clock without recording an element version.
    ///
    /// # Errors
    /// [`ModelError::ClockAhead`] as for [`VersionManager::update_version`];
    /// the clock is untouched on error.
    pub fn observe(&mut self, id: &str, ts: &VectorTimestamp) -> Result<(), ModelError> {
        self.check_clock(id, ts)?;
        self.clock = self.clock.merge(ts);
        Ok(())
    }

    fn check_clock(&self, id: &str, ts: &VectorTimestamp) -> Result<(), ModelError> {
        if ts.get(&self.replica_id) > self.clock.get(&self.replica_id) {
            return Err(ModelError::ClockAhead {
                id: id.to_owned(),
                replica: self.replica_id.clone(),
            });
        }
        Ok(())
    }

    /// Advances the local replica counter and returns a copy of the clock.
    pub fn register_local_event(&mut self) -> VectorTimestamp {
        self.clock.increment(&self.replica_id);
        self.clock.clone()
    }

    /// Stamps `id` with the current local clock and returns the stamp.
    pub fn mark_element_updated(&mut self, id: &str) -> VectorTimestamp {
        let stamp = self.clock.clone();
        self.versions.insert(id.to_owned(), stamp.clone());
        stamp
    }

    /// Forgets the version of a removed element.
    pub fn on_remove(&mut self, id: &str) {
        self.versions.remove(id);
    }
}
