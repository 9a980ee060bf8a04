//! List state owned by the update queue worker

use std::sync::Arc;

use imbib_items::{Attachment, FrozenResults, ItemKey, Notification};
use tokio_util::sync::CancellationToken;

use crate::cell::ItemCellModel;
use crate::download::{DownloadBatchData, DownloadStateOverlay, DownloadUpdate, OverlayChange};
use crate::error::ItemsError;
use crate::reconcile::{ChangeSetReconciler, LiveList, ReconcileStatus, RowListeners};
use crate::snapshot::{LoadState, SnapshotPublisher};

/// Everything the item list mutates. Only ever touched from queue jobs.
pub struct ListState {
    list: LiveList,
    overlay: DownloadStateOverlay,
    publisher: SnapshotPublisher,
    reconciler: ChangeSetReconciler,
}

impl ListState {
    pub fn new(
        overlay: DownloadStateOverlay,
        publisher: SnapshotPublisher,
        reconciler: ChangeSetReconciler,
    ) -> Self {
        Self {
            list: LiveList::default(),
            overlay,
            publisher,
            reconciler,
        }
    }

    pub fn list(&self) -> &LiveList {
        &self.list
    }

    pub fn overlay(&self) -> &DownloadStateOverlay {
        &self.overlay
    }

    /// Empty the list for a new query and publish the loading state.
    pub fn reset(&mut self, generation: u64) {
        self.list = LiveList::default();
        self.overlay.clear();
        self.publisher.reset(generation);
        self.publisher.publish(self.list.cells(), &self.overlay);
    }

    pub fn fail(&mut self, error: ItemsError) {
        self.publisher.set_load_state(LoadState::Failed(error.clone()));
        self.publisher.publish(self.list.cells(), &self.overlay);
        self.publisher.observer().show_error(&error);
    }

    /// Reconcile one top-level notification.
    pub async fn apply_notification(
        &mut self,
        notification: Notification,
        token: &CancellationToken,
        listeners: &dyn RowListeners,
    ) {
        let (snapshot, changes) = match notification {
            Notification::Initial { snapshot, changes } | Notification::Update { snapshot, changes } => {
                (snapshot, changes)
            }
            Notification::Error(e) => {
                tracing::error!(error = %e, "could not load results");
                self.fail(ItemsError::DataLoading(e.to_string()));
                return;
            }
        };

        let result = self
            .reconciler
            .apply(
                &mut self.list,
                &mut self.overlay,
                &mut self.publisher,
                &snapshot,
                &changes,
                token,
                listeners,
            )
            .await;
        match result {
            Ok(ReconcileStatus::Completed) => {}
            Ok(ReconcileStatus::Cancelled) => {
                tracing::debug!(shape = %changes.shape(), "reconcile pass cancelled");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    shape = %changes.shape(),
                    snapshot_len = snapshot.len(),
                    list_len = self.list.len(),
                    "change-set does not fit the list"
                );
            }
        }
    }

    /// Replace a row's children and rebuild only that row.
    pub fn refresh_children(&mut self, parent_key: &str, children: FrozenResults) {
        let Some(record) = self.list.record(parent_key) else {
            return;
        };
        let children = children.to_vec();
        if record.children == children {
            return;
        }
        let record = Arc::new(record.with_children(children));
        let accessory = self.reconciler.resolver().resolve(&record);
        let cell = ItemCellModel::new(&record, self.overlay.store(parent_key, accessory));
        if self.list.replace(record, cell) {
            tracing::trace!(key = parent_key, "children changed");
            self.publisher.publish(self.list.cells(), &self.overlay);
        }
    }

    /// Fold a downloader event into the visible rows.
    pub fn on_download(&mut self, update: &DownloadUpdate, batch: Option<DownloadBatchData>) {
        if let Some(change) = self.overlay.on_download_event(update, batch) {
            self.apply_overlay_change(change);
            self.publisher.publish(self.list.cells(), &self.overlay);
        }
    }

    /// Local files of these rows are gone.
    pub fn files_deleted(&mut self, keys: &[ItemKey]) {
        let mut changed = false;
        for key in keys {
            if let Some(change) = self.overlay.mark_remote(key) {
                self.apply_overlay_change(change);
                changed = true;
            }
        }
        if changed {
            self.publisher.publish(self.list.cells(), &self.overlay);
        }
    }

    pub fn attachment(&self, key: &str, parent_key: Option<&str>) -> Option<Attachment> {
        self.overlay.attachment(key, parent_key).cloned()
    }

    /// Hand the row's cached attachment to the observer for opening.
    pub fn show_attachment(&self, key: &str, parent_key: Option<&str>) {
        match self.overlay.attachment(key, parent_key) {
            Some(attachment) => self
                .publisher
                .observer()
                .show_attachment(attachment, attachment.library_id),
            None => tracing::debug!(key, "attachment to open is no longer listed"),
        }
    }

    fn apply_overlay_change(&mut self, change: OverlayChange) {
        if let OverlayChange::Row { key, accessory } = change {
            if let Some(cell) = self.list.cell_mut(&key) {
                cell.accessory = accessory;
            }
        }
    }
}
