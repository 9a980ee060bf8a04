//! Change-set reconciliation
//!
//! Applies one live-query delta to the ordered cell list. Rows are rebuilt
//! only where the change-set points; everything else is kept as is.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use imbib_items::{ChangeSet, FrozenResults, ItemKey, ItemRecord};
use tokio_util::sync::CancellationToken;

use crate::accessory::{AccessoryResolver, ItemAccessory};
use crate::cell::ItemCellModel;
use crate::download::DownloadStateOverlay;
use crate::error::ReconcileError;
use crate::snapshot::{LoadState, SnapshotPublisher};

/// Registers and releases per-row child listeners.
pub trait RowListeners: Send + Sync {
    fn attach(&self, record: &Arc<ItemRecord>, token: &CancellationToken);
    fn detach(&self, key: &str);
}

/// Ordered cells plus the record each one was built from.
#[derive(Debug, Clone, Default)]
pub struct LiveList {
    cells: Vec<ItemCellModel>,
    records: HashMap<ItemKey, Arc<ItemRecord>>,
}

impl LiveList {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[ItemCellModel] {
        &self.cells
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.key.as_str())
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.key == key)
    }

    pub fn record(&self, key: &str) -> Option<&Arc<ItemRecord>> {
        self.records.get(key)
    }

    /// Replace the cell and record of an existing row.
    pub fn replace(&mut self, record: Arc<ItemRecord>, cell: ItemCellModel) -> bool {
        match self.position(&record.key) {
            Some(index) => {
                self.cells[index] = cell;
                self.records.insert(record.key.clone(), record);
                true
            }
            None => false,
        }
    }

    pub fn cell_mut(&mut self, key: &str) -> Option<&mut ItemCellModel> {
        self.cells.iter_mut().find(|c| c.key == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Completed,
    /// The query generation was cancelled mid-pass; nothing was committed.
    Cancelled,
}

/// Applies change-sets to a [`LiveList`].
#[derive(Debug, Clone)]
pub struct ChangeSetReconciler {
    resolver: AccessoryResolver,
    update_threshold: usize,
}

impl ChangeSetReconciler {
    pub fn new(resolver: AccessoryResolver, update_threshold: usize) -> Self {
        Self {
            resolver,
            update_threshold: update_threshold.max(1),
        }
    }

    pub fn resolver(&self) -> &AccessoryResolver {
        &self.resolver
    }

    /// Apply `changes` against `snapshot`.
    ///
    /// Works on a copy of `list` that replaces it only when the pass
    /// completes. An empty change-set rebuilds the whole list from
    /// `snapshot`. Every `update_threshold` rows an intermediate snapshot is
    /// published and the task yields.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        list: &mut LiveList,
        overlay: &mut DownloadStateOverlay,
        publisher: &mut SnapshotPublisher,
        snapshot: &FrozenResults,
        changes: &ChangeSet,
        token: &CancellationToken,
        listeners: &dyn RowListeners,
    ) -> Result<ReconcileStatus, ReconcileError> {
        let rebuild = changes.is_empty();
        let mut working = if rebuild { LiveList::default() } else { list.clone() };

        let mut deletions = if rebuild { Vec::new() } else { changes.deletions.clone() };
        deletions.sort_unstable_by(|a, b| b.cmp(a));
        deletions.dedup();
        let mut insertions = if rebuild {
            (0..snapshot.len()).collect()
        } else {
            changes.insertions.clone()
        };
        insertions.sort_unstable();
        let modifications = if rebuild { Vec::new() } else { changes.modifications.clone() };

        validate(&working, snapshot, &deletions, &insertions, &modifications)?;

        for &index in &deletions {
            if token.is_cancelled() {
                return Ok(ReconcileStatus::Cancelled);
            }
            let removed = working.cells.remove(index);
            working.records.remove(&removed.key);
        }

        publisher.set_load_state(LoadState::Content);
        let mut resolved: HashMap<ItemKey, Option<ItemAccessory>> = HashMap::new();
        let mut processed = 0usize;

        let rows = insertions
            .iter()
            .map(|&i| (i, true))
            .chain(modifications.iter().map(|&i| (i, false)));
        for (index, inserted) in rows {
            if token.is_cancelled() {
                return Ok(ReconcileStatus::Cancelled);
            }
            let record = Arc::clone(&snapshot[index]);
            let accessory = self.resolver.resolve(&record);
            let cell = ItemCellModel::new(&record, overlay.cell_accessory(accessory.as_ref()));
            resolved.insert(record.key.clone(), accessory);

            // A key that is already listed is replaced where it stands.
            let existing = match working.cells.get(index) {
                Some(listed) if listed.key == record.key => Some(index),
                _ if working.records.contains_key(&record.key) => working.position(&record.key),
                _ => None,
            };
            if let Some(existing) = existing {
                working.cells[existing] = cell;
            } else if inserted && index <= working.cells.len() {
                working.cells.insert(index, cell);
            } else if !inserted && index < working.cells.len() {
                // A modified row must already hold its key
                return Err(ReconcileError::SnapshotMismatch {
                    index,
                    list_len: working.len(),
                    snapshot_len: snapshot.len(),
                });
            } else {
                return Err(ReconcileError::IndexOutOfBounds {
                    kind: if inserted { "insertion" } else { "modification" },
                    index,
                    len: working.cells.len(),
                });
            }
            working.records.insert(record.key.clone(), record);

            processed += 1;
            if processed % self.update_threshold == 0 {
                if token.is_cancelled() {
                    return Ok(ReconcileStatus::Cancelled);
                }
                publisher.publish(&working.cells, overlay);
                tokio::task::yield_now().await;
            }
        }

        if token.is_cancelled() {
            return Ok(ReconcileStatus::Cancelled);
        }
        verify(&working, snapshot)?;
        self.commit(list, working, overlay, resolved, token, listeners);
        publisher.publish(&list.cells, overlay);
        tracing::debug!(
            shape = %changes.shape(),
            rebuild,
            rows = list.len(),
            "change-set applied"
        );
        Ok(ReconcileStatus::Completed)
    }

    fn commit(
        &self,
        list: &mut LiveList,
        working: LiveList,
        overlay: &mut DownloadStateOverlay,
        resolved: HashMap<ItemKey, Option<ItemAccessory>>,
        token: &CancellationToken,
        listeners: &dyn RowListeners,
    ) {
        let before: HashSet<&str> = list.keys().collect();
        let after: HashSet<&str> = working.keys().collect();

        for key in before.difference(&after) {
            overlay.evict(key);
            listeners.detach(key);
        }
        for key in after.difference(&before) {
            if let Some(record) = working.records.get(*key) {
                listeners.attach(record, token);
            }
        }
        for (key, accessory) in resolved {
            if after.contains(key.as_str()) {
                overlay.store(&key, accessory);
            }
        }
        *list = working;
    }
}

fn validate(
    list: &LiveList,
    snapshot: &FrozenResults,
    deletions: &[usize],
    insertions: &[usize],
    modifications: &[usize],
) -> Result<(), ReconcileError> {
    if let Some(&index) = deletions.iter().find(|&&i| i >= list.len()) {
        return Err(ReconcileError::IndexOutOfBounds {
            kind: "deletion",
            index,
            len: list.len(),
        });
    }
    let checks = [("insertion", insertions), ("modification", modifications)];
    for (kind, indices) in checks {
        if let Some(&index) = indices.iter().find(|&&i| i >= snapshot.len()) {
            return Err(ReconcileError::IndexOutOfBounds {
                kind,
                index,
                len: snapshot.len(),
            });
        }
    }
    Ok(())
}

/// The finished list must hold exactly the snapshot's keys in order.
fn verify(working: &LiveList, snapshot: &FrozenResults) -> Result<(), ReconcileError> {
    let mismatch = working
        .keys()
        .zip(snapshot.keys())
        .position(|(listed, expected)| listed != expected)
        .or_else(|| (working.len() != snapshot.len()).then(|| working.len().min(snapshot.len())));
    match mismatch {
        Some(index) => Err(ReconcileError::SnapshotMismatch {
            index,
            list_len: working.len(),
            snapshot_len: snapshot.len(),
        }),
        None => Ok(()),
    }
}
