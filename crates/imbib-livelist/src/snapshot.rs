//! Immutable views published to the presentation layer

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use imbib_items::{Attachment, ItemKey, LibraryId};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cell::{CellAccessory, ItemCellModel};
use crate::download::{DownloadBatchData, DownloadStateOverlay};
use crate::error::ItemsError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Loading,
    Content,
    Failed(ItemsError),
}

/// One published state of the item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsSnapshot {
    /// Query the cells belong to; bumped by every re-query.
    pub query_generation: u64,
    /// Bumped by every publish.
    pub revision: u64,
    pub load_state: LoadState,
    pub cells: Arc<Vec<ItemCellModel>>,
    /// Accessories of rows with a download in progress.
    pub downloading: HashMap<ItemKey, CellAccessory>,
    pub batch: Option<DownloadBatchData>,
}

impl Default for ItemsSnapshot {
    fn default() -> Self {
        Self {
            query_generation: 0,
            revision: 0,
            load_state: LoadState::Loading,
            cells: Arc::new(Vec::new()),
            downloading: HashMap::new(),
            batch: None,
        }
    }
}

impl ItemsSnapshot {
    pub fn keys(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.key.as_str()).collect()
    }

    pub fn cell(&self, key: &str) -> Option<&ItemCellModel> {
        self.cells.iter().find(|c| c.key == key)
    }
}

/// Receives everything the item list wants to show.
///
/// Called from the update worker; implementations must not block.
pub trait ItemsObserver: Send + Sync {
    fn snapshot_published(&self, _snapshot: &ItemsSnapshot) {}

    /// An attachment requested through `open` finished downloading.
    fn show_attachment(&self, _attachment: &Attachment, _library_id: LibraryId) {}

    fn show_error(&self, _error: &ItemsError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ItemsObserver for NoopObserver {}

/// Latest query generation issued.
///
/// Shared by the controller and the publisher. Snapshots of an older
/// generation are dropped once a newer one has been issued.
#[derive(Debug, Clone, Default)]
pub struct GenerationGate(Arc<Mutex<u64>>);

impl GenerationGate {
    pub fn advance(&self, generation: u64) {
        let mut issued = self.lock();
        *issued = (*issued).max(generation);
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds snapshots and hands them to the watch channel and the observer.
pub struct SnapshotPublisher {
    sender: watch::Sender<ItemsSnapshot>,
    observer: Arc<dyn ItemsObserver>,
    gate: GenerationGate,
    generation: u64,
    revision: u64,
    load_state: LoadState,
}

impl SnapshotPublisher {
    pub fn new(observer: Arc<dyn ItemsObserver>, gate: GenerationGate) -> (Self, watch::Receiver<ItemsSnapshot>) {
        let (sender, receiver) = watch::channel(ItemsSnapshot::default());
        (
            Self {
                sender,
                observer,
                gate,
                generation: 0,
                revision: 0,
                load_state: LoadState::Loading,
            },
            receiver,
        )
    }

    /// Start publishing for a new query.
    pub fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.load_state = LoadState::Loading;
    }

    pub fn set_load_state(&mut self, load_state: LoadState) {
        self.load_state = load_state;
    }

    pub fn observer(&self) -> &Arc<dyn ItemsObserver> {
        &self.observer
    }

    /// Publish `cells`, unless a newer query has been issued meanwhile.
    pub fn publish(&mut self, cells: &[ItemCellModel], overlay: &DownloadStateOverlay) {
        let snapshot = {
            // Held across the send so a superseded snapshot can never land
            // after the newer generation was issued.
            let issued = self.gate.lock();
            if *issued > self.generation {
                tracing::trace!(generation = self.generation, issued = *issued, "dropping superseded snapshot");
                return;
            }
            self.revision += 1;
            let snapshot = ItemsSnapshot {
                query_generation: self.generation,
                revision: self.revision,
                load_state: self.load_state.clone(),
                cells: Arc::new(cells.to_vec()),
                downloading: overlay.downloading(),
                batch: overlay.batch(),
            };
            tracing::trace!(
                generation = snapshot.query_generation,
                revision = snapshot.revision,
                rows = snapshot.cells.len(),
                "publishing snapshot"
            );
            self.sender.send_replace(snapshot.clone());
            snapshot
        };
        self.observer.snapshot_published(&snapshot);
    }
}
