// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Vector timestamps for causal ordering across replicas.
use std::collections::BTreeMap;

/// Causal relation of one timestamp to another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CausalRelation {
    /// Every component is `<=` and at least one is `<`.
    StrictlyBefore,
    /// Every component is `>=` and at least one is `>`.
    StrictlyAfter,
    /// All components are equal.
    Equal,
    /// Some components are larger and some smaller.
    Parallel,
}

/// Mapping from replica id to a monotonically increasing counter.
///
/// Missing replicas read as `0`. Zero components are never stored, so two
/// timestamps compare equal with `==` iff they are causally [`CausalRelation::Equal`].
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct VectorTimestamp {
    counters: BTreeMap<String, u64>,
}

impl VectorTimestamp {
    /// The empty timestamp (all components `0`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `replica`, `0` if absent.
    pub fn get(&self, replica: &str) -> u64 {
        self.counters.get(replica).copied().unwrap_or(0)
    }

    /// Sets the counter for `replica`. Setting `0` removes the component.
    pub fn set(&mut self, replica: impl Into<String>, value: u64) {
        let replica = replica.into();
        if value == 0 {
            self.counters.remove(&replica);
        } else {
            self.counters.insert(replica, value);
        }
    }

    /// Advances the counter for `replica` by one and returns the new value.
    pub fn increment(&mut self, replica: &str) -> u64 {
        let next = self.get(replica).saturating_add(1);
        self.set(replica, next);
        next
    }

    /// Returns `true` if every component is `0`.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Non-zero components in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Relation of `self` to `other`.
    pub fn relation_to(&self, other: &VectorTimestamp) -> CausalRelation {
        let mut one_less = false;
        let mut one_greater = false;
        for replica in self.counters.keys().chain(other.counters.keys()) {
            let mine = self.get(replica);
            let theirs = other.get(replica);
            if mine < theirs {
                one_less = true;
            } else if mine > theirs {
                one_greater = true;
            }
        }
        match (one_less, one_greater) {
            (true, true) => CausalRelation::Parallel,
            (true, false) => CausalRelation::StrictlyBefore,
            (false, true) => CausalRelation::StrictlyAfter,
            (false, false) => CausalRelation::Equal,
        }
    }

    /// Returns `true` if `self` happened strictly before `other`.
    pub fn is_strictly_before(&self, other: &VectorTimestamp) -> bool {
        self.relation_to(other) == CausalRelation::StrictlyBefore
    }

    /// Component-wise maximum of both timestamps.
    #[must_use]
    pub fn merge(&self, other: &VectorTimestamp) -> VectorTimestamp {
        let mut merged = self.clone();
        for (replica, value) in &other.counters {
            if merged.get(replica) < *value {
                merged.counters.insert(replica.clone(), *value);
            }
        }
        merged
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for VectorTimestamp {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut ts = Self::new();
        for (replica, value) in iter {
            ts.set(replica, value);
        }
        ts
    }
}

/// Relation of `a` to `b`; shorthand for [`VectorTimestamp::relation_to`].
pub fn compare(a: &VectorTimestamp, b: &VectorTimestamp) -> CausalRelation {
    a.relation_to(b)
}

/// Component-wise maximum; shorthand for [`VectorTimestamp::merge`].
pub fn merge(a: &VectorTimestamp, b: &VectorTimestamp) -> VectorTimestamp {
    a.merge(b)
}
