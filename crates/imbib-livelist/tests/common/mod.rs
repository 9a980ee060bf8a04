//! Shared fakes for the engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use imbib_items::{
    field_keys, item_types, Attachment, CollectionScope, ItemKey, ItemRecord, LibraryId, MemoryLibrary,
};
use imbib_livelist::{
    AttachmentDownloader, AttachmentFileCleanup, DownloadBatchData, DownloadKind, DownloadUpdate, EngineConfig,
    EngineDeps, ItemsEngine, ItemsError, ItemsObserver, ItemsSnapshot, MemoryPreferences, Preferences,
};
use tokio::sync::{broadcast, watch};

pub const LIBRARY: LibraryId = LibraryId::User(1);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn article(key: &str, title: &str, minute: u32) -> ItemRecord {
    ItemRecord::new(key, LIBRARY, "journalArticle")
        .with_title(title)
        .added_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap())
}

/// Imported PDF attachment of `parent`.
pub fn pdf(key: &str, parent: &str, downloaded: bool) -> ItemRecord {
    let mut record = ItemRecord::new(key, LIBRARY, item_types::ATTACHMENT)
        .with_parent(parent)
        .with_field(field_keys::LINK_MODE, "imported_file")
        .with_field(field_keys::CONTENT_TYPE, "application/pdf")
        .with_field(field_keys::FILENAME, format!("{key}.pdf"))
        .added_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    record.file_downloaded = downloaded;
    record.has_remote_file = true;
    record
}

/// Downloader driven by the test through [`FakeDownloader::emit`].
pub struct FakeDownloader {
    sender: broadcast::Sender<DownloadUpdate>,
    progress: Mutex<HashMap<ItemKey, u8>>,
    errors: Mutex<HashMap<ItemKey, String>>,
    requested: Mutex<Vec<(ItemKey, Option<ItemKey>)>>,
    cancelled: Mutex<Vec<ItemKey>>,
    batch: Mutex<Option<DownloadBatchData>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sender: broadcast::channel(64).0,
            progress: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            batch: Mutex::new(None),
        })
    }

    pub fn set_progress(&self, key: &str, progress: u8) {
        self.progress.lock().unwrap().insert(key.to_string(), progress);
    }

    pub fn set_batch(&self, batch: Option<DownloadBatchData>) {
        *self.batch.lock().unwrap() = batch;
    }

    /// Publish an event, keeping the progress table consistent with it.
    pub fn emit(&self, key: &str, parent_key: Option<&str>, kind: DownloadKind) {
        match &kind {
            DownloadKind::Progress(p) => self.set_progress(key, *p),
            DownloadKind::Failed(error) => {
                self.progress.lock().unwrap().remove(key);
                self.errors.lock().unwrap().insert(key.to_string(), error.clone());
            }
            DownloadKind::Ready | DownloadKind::Cancelled => {
                self.progress.lock().unwrap().remove(key);
                self.errors.lock().unwrap().remove(key);
            }
        }
        let _ = self.sender.send(DownloadUpdate {
            key: key.to_string(),
            parent_key: parent_key.map(str::to_string),
            library_id: LIBRARY,
            kind,
        });
    }

    pub fn requested(&self) -> Vec<(ItemKey, Option<ItemKey>)> {
        self.requested.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<ItemKey> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl AttachmentDownloader for FakeDownloader {
    fn updates(&self) -> broadcast::Receiver<DownloadUpdate> {
        self.sender.subscribe()
    }

    fn progress_and_error(&self, key: &str, _library_id: LibraryId) -> (Option<u8>, Option<String>) {
        (
            self.progress.lock().unwrap().get(key).copied(),
            self.errors.lock().unwrap().get(key).cloned(),
        )
    }

    fn download_if_needed(&self, attachment: &Attachment, parent_key: Option<&str>) {
        self.requested
            .lock()
            .unwrap()
            .push((attachment.key.clone(), parent_key.map(str::to_string)));
    }

    fn cancel(&self, key: &str, _library_id: LibraryId) {
        self.cancelled.lock().unwrap().push(key.to_string());
        self.progress.lock().unwrap().remove(key);
    }

    fn batch_data(&self) -> Option<DownloadBatchData> {
        *self.batch.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingCleanup {
    pub calls: Mutex<Vec<(Vec<ItemKey>, CollectionScope, LibraryId)>>,
}

impl AttachmentFileCleanup for RecordingCleanup {
    fn delete_for_items(&self, keys: &[ItemKey], collection: &CollectionScope, library_id: LibraryId) {
        self.calls
            .lock()
            .unwrap()
            .push((keys.to_vec(), collection.clone(), library_id));
    }
}

type PublishHook = Box<dyn Fn(&ItemsEngine, &ItemsSnapshot) + Send + Sync>;

/// Records every callback. An optional hook runs inside `snapshot_published`
/// with the engine under test.
#[derive(Default)]
pub struct RecordingObserver {
    pub snapshots: Mutex<Vec<ItemsSnapshot>>,
    pub opened: Mutex<Vec<Attachment>>,
    pub errors: Mutex<Vec<ItemsError>>,
    engine: OnceLock<ItemsEngine>,
    hook: Mutex<Option<PublishHook>>,
}

impl RecordingObserver {
    pub fn set_hook(&self, engine: &ItemsEngine, hook: PublishHook) {
        let _ = self.engine.set(engine.clone());
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn snapshots(&self) -> Vec<ItemsSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl ItemsObserver for RecordingObserver {
    fn snapshot_published(&self, snapshot: &ItemsSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        if let (Some(engine), Some(hook)) = (self.engine.get(), self.hook.lock().unwrap().as_ref()) {
            hook(engine, snapshot);
        }
    }

    fn show_attachment(&self, attachment: &Attachment, _library_id: LibraryId) {
        self.opened.lock().unwrap().push(attachment.clone());
    }

    fn show_error(&self, error: &ItemsError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

pub struct Harness {
    pub store: MemoryLibrary,
    pub downloader: Arc<FakeDownloader>,
    pub cleanup: Arc<RecordingCleanup>,
    pub observer: Arc<RecordingObserver>,
    pub engine: ItemsEngine,
}

impl Harness {
    pub fn start(store: MemoryLibrary) -> Self {
        Self::start_with(store, EngineConfig::default(), Arc::new(MemoryPreferences::default()), None)
    }

    pub fn start_with(
        store: MemoryLibrary,
        config: EngineConfig,
        preferences: Arc<dyn Preferences>,
        initial_search_term: Option<&str>,
    ) -> Self {
        init_tracing();
        let downloader = FakeDownloader::new();
        let cleanup = Arc::new(RecordingCleanup::default());
        let observer = Arc::new(RecordingObserver::default());
        let engine = ItemsEngine::start(
            EngineDeps {
                store: Arc::new(store.clone()),
                downloader: downloader.clone(),
                cleanup: cleanup.clone(),
                preferences,
                observer: observer.clone(),
                config,
            },
            LIBRARY,
            CollectionScope::All,
            initial_search_term.map(str::to_string),
        )
        .expect("engine starts");
        Self {
            store,
            downloader,
            cleanup,
            observer,
            engine,
        }
    }

    pub async fn wait_for(&self, predicate: impl Fn(&ItemsSnapshot) -> bool) -> ItemsSnapshot {
        let mut rx = self.engine.subscribe();
        wait_for(&mut rx, predicate).await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.engine.clear();
    }
}

/// Wait up to five seconds for a snapshot matching `predicate`.
pub async fn wait_for(
    rx: &mut watch::Receiver<ItemsSnapshot>,
    predicate: impl Fn(&ItemsSnapshot) -> bool,
) -> ItemsSnapshot {
    let waiting = async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if predicate(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("engine stopped");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("timed out waiting for snapshot")
}

pub fn keys(snapshot: &ItemsSnapshot) -> Vec<String> {
    snapshot.cells.iter().map(|c| c.key.clone()).collect()
}
