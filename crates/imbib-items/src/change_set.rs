//! Change-sets describing one delta of a live result set

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Index;
use std::sync::Arc;

use crate::item::ItemRecord;
use crate::store::StoreError;

/// Index positions touched by one store mutation.
///
/// `deletions` index the prior result; `insertions` and `modifications`
/// index the new one. Moves are expressed as a deletion plus an insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }

    /// Short `-d +i ~m` description used in log lines.
    pub fn shape(&self) -> String {
        format!(
            "-{} +{} ~{}",
            self.deletions.len(),
            self.insertions.len(),
            self.modifications.len()
        )
    }

    /// Change-set turning `old` into `new`.
    ///
    /// Entries are `(key, version)` pairs; keys are unique within each side.
    /// The longest run of shared keys whose relative order is unchanged stays
    /// in place, everything else is deleted or inserted, and kept entries with
    /// a different version are reported as modifications.
    pub fn between<K, V>(old: &[(K, V)], new: &[(K, V)]) -> ChangeSet
    where
        K: Eq + Hash,
        V: PartialEq,
    {
        let new_positions: HashMap<&K, usize> =
            new.iter().enumerate().map(|(i, (k, _))| (k, i)).collect();

        // (old index, new index) for every key present on both sides, in old order.
        let shared: Vec<(usize, usize)> = old
            .iter()
            .enumerate()
            .filter_map(|(i, (k, _))| new_positions.get(k).map(|&j| (i, j)))
            .collect();

        let stable = longest_increasing_run(&shared);

        let mut kept_old = vec![false; old.len()];
        let mut kept_new = vec![false; new.len()];
        for &(i, j) in &stable {
            kept_old[i] = true;
            kept_new[j] = true;
        }

        let deletions = (0..old.len()).filter(|&i| !kept_old[i]).collect();
        let insertions = (0..new.len()).filter(|&j| !kept_new[j]).collect();
        let mut modifications: Vec<usize> = stable
            .iter()
            .filter(|&&(i, j)| old[i].1 != new[j].1)
            .map(|&(_, j)| j)
            .collect();
        modifications.sort_unstable();

        ChangeSet {
            deletions,
            insertions,
            modifications,
        }
    }
}

/// Longest subsequence of `pairs` whose second component strictly increases.
fn longest_increasing_run(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    // tails[k] = index into `pairs` of the smallest tail of a run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; pairs.len()];

    for (idx, &(_, value)) in pairs.iter().enumerate() {
        let slot = tails.partition_point(|&t| pairs[t].1 < value);
        if slot > 0 {
            previous[idx] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(idx);
        } else {
            tails[slot] = idx;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(idx) = cursor {
        run.push(pairs[idx]);
        cursor = previous[idx];
    }
    run.reverse();
    run
}

/// Immutable point-in-time copy of a live result set.
///
/// Cheap to clone and safe to read from any thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrozenResults {
    records: Arc<Vec<Arc<ItemRecord>>>,
}

impl FrozenResults {
    pub fn new(records: Vec<Arc<ItemRecord>>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<ItemRecord>> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ItemRecord>> {
        self.records.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }

    pub fn to_vec(&self) -> Vec<Arc<ItemRecord>> {
        self.records.as_ref().clone()
    }
}

impl Index<usize> for FrozenResults {
    type Output = Arc<ItemRecord>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}

impl FromIterator<ItemRecord> for FrozenResults {
    fn from_iter<I: IntoIterator<Item = ItemRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Arc::new).collect())
    }
}

/// One delivery from a live result subscription.
#[derive(Debug, Clone)]
pub enum Notification {
    /// First delivery after subscribing. The change-set may be empty.
    Initial {
        snapshot: FrozenResults,
        changes: ChangeSet,
    },
    Update {
        snapshot: FrozenResults,
        changes: ChangeSet,
    },
    /// The subscription is dead; nothing else will be delivered on it.
    Error(StoreError),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Initial { .. } => "initial",
            Notification::Update { .. } => "update",
            Notification::Error(_) => "error",
        }
    }
}
