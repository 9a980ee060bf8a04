//! Download state overlay
//!
//! Keeps the resolved accessory of every visible row and folds attachment
//! downloader events into it, so a download only ever touches the row that
//! owns the attachment.

use std::collections::HashMap;
use std::sync::Arc;

use imbib_items::{Attachment, AttachmentKind, CollectionScope, FileLocation, ItemKey, LibraryId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::accessory::ItemAccessory;
use crate::cell::{AttachmentBadge, CellAccessory};

/// What happened to one attachment download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadKind {
    Progress(u8),
    Ready,
    Failed(String),
    Cancelled,
}

impl DownloadKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadKind::Progress(_))
    }
}

/// Event published by the attachment downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadUpdate {
    pub key: ItemKey,
    pub parent_key: Option<ItemKey>,
    pub library_id: LibraryId,
    pub kind: DownloadKind,
}

impl DownloadUpdate {
    /// Key of the row this update belongs to.
    pub fn row_key(&self) -> &str {
        self.parent_key.as_deref().unwrap_or(&self.key)
    }
}

/// Aggregate progress across a batch of downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadBatchData {
    pub progress: u8,
    pub remaining: usize,
    pub total: usize,
}

/// The attachment download collaborator.
pub trait AttachmentDownloader: Send + Sync {
    /// Stream of download events.
    fn updates(&self) -> broadcast::Receiver<DownloadUpdate>;

    /// Current progress (0-100) and last error for one attachment.
    fn progress_and_error(&self, key: &str, library_id: LibraryId) -> (Option<u8>, Option<String>);

    /// Start a download unless the file is already local.
    fn download_if_needed(&self, attachment: &Attachment, parent_key: Option<&str>);

    fn cancel(&self, key: &str, library_id: LibraryId);

    /// Batch progress, if a batch is running.
    fn batch_data(&self) -> Option<DownloadBatchData>;
}

/// Which collection a file deletion covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentFileDeleted {
    /// Every attachment file of `keys`, requested from `collection`.
    AllForItems {
        keys: Vec<ItemKey>,
        collection: CollectionScope,
    },
    Individual {
        key: ItemKey,
        parent_key: Option<ItemKey>,
    },
}

/// Deletes downloaded attachment files.
pub trait AttachmentFileCleanup: Send + Sync {
    fn delete_for_items(&self, keys: &[ItemKey], collection: &CollectionScope, library_id: LibraryId);
}

/// Result of folding one event into the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayChange {
    /// Only the in-progress map changed.
    Downloading(ItemKey),
    /// The row's cell accessory must be replaced.
    Row {
        key: ItemKey,
        accessory: Option<CellAccessory>,
    },
}

/// Per-row accessory cache plus the in-progress download map.
pub struct DownloadStateOverlay {
    downloader: Arc<dyn AttachmentDownloader>,
    accessories: HashMap<ItemKey, ItemAccessory>,
    downloading: HashMap<ItemKey, Option<CellAccessory>>,
    batch: Option<DownloadBatchData>,
}

impl DownloadStateOverlay {
    pub fn new(downloader: Arc<dyn AttachmentDownloader>) -> Self {
        Self {
            downloader,
            accessories: HashMap::new(),
            downloading: HashMap::new(),
            batch: None,
        }
    }

    /// Cell projection of an accessory, consulting live download state.
    pub fn cell_accessory(&self, accessory: Option<&ItemAccessory>) -> Option<CellAccessory> {
        match accessory? {
            ItemAccessory::Attachment(attachment) => {
                let (progress, error) = self
                    .downloader
                    .progress_and_error(&attachment.key, attachment.library_id);
                Some(CellAccessory::Attachment(badge(attachment, progress, error)))
            }
            ItemAccessory::Url(_) => Some(CellAccessory::Url),
            ItemAccessory::Doi(_) => Some(CellAccessory::Doi),
        }
    }

    /// Cache the accessory for a row and return its cell projection.
    pub fn store(&mut self, key: &str, accessory: Option<ItemAccessory>) -> Option<CellAccessory> {
        let cell = self.cell_accessory(accessory.as_ref());
        match accessory {
            Some(accessory) => {
                self.accessories.insert(key.to_string(), accessory);
            }
            None => {
                self.accessories.remove(key);
            }
        }
        cell
    }

    pub fn evict(&mut self, key: &str) {
        self.accessories.remove(key);
        self.downloading.remove(key);
    }

    pub fn clear(&mut self) {
        self.accessories.clear();
        self.downloading.clear();
    }

    pub fn accessory(&self, key: &str) -> Option<&ItemAccessory> {
        self.accessories.get(key)
    }

    /// Attachment cached for the row owning `key`.
    pub fn attachment(&self, key: &str, parent_key: Option<&str>) -> Option<&Attachment> {
        self.accessories.get(parent_key.unwrap_or(key))?.attachment()
    }

    /// In-progress accessories keyed by row.
    pub fn downloading(&self) -> HashMap<ItemKey, CellAccessory> {
        self.downloading
            .iter()
            .filter_map(|(key, accessory)| accessory.clone().map(|a| (key.clone(), a)))
            .collect()
    }

    pub fn batch(&self) -> Option<DownloadBatchData> {
        self.batch
    }

    /// Fold a downloader event into the overlay.
    ///
    /// Returns `None` when no visible row holds the attachment.
    pub fn on_download_event(
        &mut self,
        update: &DownloadUpdate,
        batch: Option<DownloadBatchData>,
    ) -> Option<OverlayChange> {
        let key = update.row_key().to_string();
        let attachment = self.accessories.get(&key)?.attachment()?;

        if update.kind == DownloadKind::Ready {
            if let Some(moved) = attachment.with_location(FileLocation::Local) {
                self.accessories.insert(key.clone(), ItemAccessory::Attachment(moved));
            }
        }
        if self.batch != batch {
            self.batch = batch;
        }

        if update.kind.is_terminal() {
            self.downloading.remove(&key);
            let accessory = self.cell_accessory(self.accessories.get(&key));
            Some(OverlayChange::Row { key, accessory })
        } else {
            let accessory = self.cell_accessory(self.accessories.get(&key));
            self.downloading.insert(key.clone(), accessory);
            Some(OverlayChange::Downloading(key))
        }
    }

    /// A row's local file was deleted; its attachment is remote again.
    pub fn mark_remote(&mut self, key: &str) -> Option<OverlayChange> {
        let attachment = self.accessories.get(key)?.attachment()?;
        if !matches!(attachment.kind, AttachmentKind::File { .. }) {
            return None;
        }
        if let Some(moved) = attachment.with_location(FileLocation::Remote) {
            self.accessories
                .insert(key.to_string(), ItemAccessory::Attachment(moved));
        }
        let accessory = self.cell_accessory(self.accessories.get(key));
        Some(OverlayChange::Row {
            key: key.to_string(),
            accessory,
        })
    }
}

fn badge(attachment: &Attachment, progress: Option<u8>, error: Option<String>) -> AttachmentBadge {
    if let Some(progress) = progress {
        return AttachmentBadge::InProgress(progress.min(100));
    }
    if let Some(error) = error {
        return AttachmentBadge::Failed(error);
    }
    match attachment.location() {
        Some(FileLocation::Local | FileLocation::LocalAndChangedRemotely) | None => AttachmentBadge::Ready,
        Some(FileLocation::Remote) => AttachmentBadge::NotDownloaded,
        Some(FileLocation::RemoteMissing) => AttachmentBadge::Missing,
    }
}
