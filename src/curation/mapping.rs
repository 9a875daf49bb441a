//! Old → new episode index mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dense, order-preserving renumbering of surviving episodes
///
/// Built once per curation run from the ascending good-episode set, before
/// any file is touched, and never mutated afterwards. The `k`-th smallest
/// surviving index maps to `k`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeIndexMapping {
    forward: BTreeMap<u64, u64>,
}

impl EpisodeIndexMapping {
    /// Assign `0, 1, 2, …` to `survivors` in ascending order
    ///
    /// Duplicates are ignored; input order does not matter.
    pub fn from_survivors<I>(survivors: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut ordered: Vec<u64> = survivors.into_iter().collect();
        ordered.sort_unstable();
        ordered.dedup();
        let forward = ordered.into_iter().zip(0u64..).collect();
        Self { forward }
    }

    /// New index for `old`, if that episode survives
    #[must_use]
    pub fn get(&self, old: u64) -> Option<u64> {
        self.forward.get(&old).copied()
    }

    /// Whether `old` survives
    #[must_use]
    pub fn contains(&self, old: u64) -> bool {
        self.forward.contains_key(&old)
    }

    /// Number of surviving episodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// No survivors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// `(old, new)` pairs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.forward.iter().map(|(&old, &new)| (old, new))
    }

    /// Surviving old indices, ascending
    pub fn survivors(&self) -> impl Iterator<Item = u64> + '_ {
        self.forward.keys().copied()
    }

    /// Strictly increasing and dense from zero
    #[must_use]
    pub fn is_dense_and_ordered(&self) -> bool {
        self.forward
            .values()
            .zip(0u64..)
            .all(|(&new, expected)| new == expected)
    }
}
