//! Item list engine
//!
//! [`ItemsEngine`] wires the live query, the update queue, the child
//! listeners and the downloader together for one collection of one library.
//! Consumers drive it with search, filter and sort input and read immutable
//! [`ItemsSnapshot`]s back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use imbib_items::{
    Attachment, CollectionScope, ItemKey, ItemsFilter, ItemsSortType, LibraryId, LiveStore, SortField,
    SubscriptionId,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::accessory::AccessoryResolver;
use crate::children::ChildListenerMesh;
use crate::config::EngineConfig;
use crate::controller::ResultSetController;
use crate::download::{
    AttachmentDownloader, AttachmentFileCleanup, AttachmentFileDeleted, DownloadKind, DownloadStateOverlay,
    DownloadUpdate,
};
use crate::error::Result;
use crate::preferences::Preferences;
use crate::queue::UpdateQueue;
use crate::reconcile::ChangeSetReconciler;
use crate::search::{debounce, SearchDebouncer};
use crate::snapshot::{GenerationGate, ItemsObserver, ItemsSnapshot, SnapshotPublisher};
use crate::state::ListState;

/// Collaborators the engine runs against.
pub struct EngineDeps {
    pub store: Arc<dyn LiveStore>,
    pub downloader: Arc<dyn AttachmentDownloader>,
    pub cleanup: Arc<dyn AttachmentFileCleanup>,
    pub preferences: Arc<dyn Preferences>,
    pub observer: Arc<dyn ItemsObserver>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone)]
struct SearchState {
    search_term: Option<String>,
    filters: Vec<ItemsFilter>,
    sort: ItemsSortType,
}

struct Inner {
    library_id: LibraryId,
    scope: CollectionScope,
    root: CancellationToken,
    queue: UpdateQueue<ListState>,
    controller: ResultSetController,
    downloader: Arc<dyn AttachmentDownloader>,
    cleanup: Arc<dyn AttachmentFileCleanup>,
    preferences: Arc<dyn Preferences>,
    snapshots: watch::Receiver<ItemsSnapshot>,
    search: Mutex<SearchState>,
    debouncer: Mutex<Option<SearchDebouncer>>,
    attachment_to_open: Arc<Mutex<Option<ItemKey>>>,
    files_deleted: mpsc::UnboundedSender<AttachmentFileDeleted>,
}

impl Inner {
    /// Re-issue the query from the current search state.
    fn requery(&self) -> Result<SubscriptionId> {
        let search = lock(&self.search);
        self.controller
            .set_query(search.search_term.as_deref(), &search.filters, search.sort)
    }

    /// Apply settled search text unless it is already the current term.
    fn search(&self, text: String) {
        let term = (!text.is_empty()).then_some(text);
        {
            let mut search = lock(&self.search);
            if search.search_term == term {
                tracing::trace!(term = ?search.search_term, "search unchanged");
                return;
            }
            search.search_term = term;
        }
        if let Err(e) = self.requery() {
            tracing::warn!(error = %e, "search query failed");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Live item list of one collection.
///
/// Cheap to clone; all clones drive the same list. The list is torn down when
/// the last clone is dropped or [`ItemsEngine::clear`] is called.
#[derive(Clone)]
pub struct ItemsEngine {
    inner: Arc<Inner>,
}

impl ItemsEngine {
    /// Start the engine and issue the initial query.
    ///
    /// A failing initial query does not fail `start`; it is published as a
    /// failed load state instead.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        deps: EngineDeps,
        library_id: LibraryId,
        scope: CollectionScope,
        initial_search_term: Option<String>,
    ) -> Result<Self> {
        deps.config.validate()?;
        let EngineDeps {
            store,
            downloader,
            cleanup,
            preferences,
            observer,
            config,
        } = deps;

        let root = CancellationToken::new();
        let gate = GenerationGate::default();
        let (publisher, snapshots) = SnapshotPublisher::new(observer, gate.clone());
        let reconciler = ChangeSetReconciler::new(
            AccessoryResolver::new(config.webdav_enabled),
            config.update_threshold,
        );
        let overlay = DownloadStateOverlay::new(Arc::clone(&downloader));
        let (queue, _worker) = UpdateQueue::spawn(ListState::new(overlay, publisher, reconciler), root.clone());

        let mesh = Arc::new(ChildListenerMesh::new(Arc::clone(&store), queue.clone()));
        let controller = ResultSetController::new(
            store,
            queue.clone(),
            mesh,
            gate,
            library_id,
            scope.clone(),
            root.clone(),
        );

        let attachment_to_open = Arc::new(Mutex::new(None));
        tokio::spawn(download_events(
            downloader.updates(),
            Arc::clone(&downloader),
            queue.clone(),
            Arc::clone(&attachment_to_open),
            root.clone(),
        ));

        let (files_deleted, deletions) = mpsc::unbounded_channel();
        tokio::spawn(deleted_files(
            deletions,
            scope.clone(),
            config.file_deleted_debounce(),
            queue.clone(),
            root.clone(),
        ));

        let sort = preferences.items_sort_type();
        let initial_search_term = initial_search_term.filter(|term| !term.is_empty());
        let inner = Arc::new(Inner {
            library_id,
            scope,
            root,
            queue,
            controller,
            downloader,
            cleanup,
            preferences,
            snapshots,
            search: Mutex::new(SearchState {
                search_term: initial_search_term,
                filters: Vec::new(),
                sort,
            }),
            debouncer: Mutex::new(None),
            attachment_to_open,
            files_deleted,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let debouncer = SearchDebouncer::spawn(
            config.search_debounce(),
            inner.root.child_token(),
            move |text| {
                if let Some(inner) = weak.upgrade() {
                    inner.search(text);
                }
            },
        );
        *lock(&inner.debouncer) = Some(debouncer);

        tracing::info!(library = %library_id, scope = ?inner.scope, "starting item list");
        if let Err(e) = inner.requery() {
            tracing::warn!(error = %e, "initial items query failed");
        }
        Ok(Self { inner })
    }

    /// Raw search field edit; applied after the debounce period.
    pub fn on_search(&self, text: impl Into<String>) {
        if let Some(debouncer) = lock(&self.inner.debouncer).as_ref() {
            debouncer.push(text);
        }
    }

    /// Replace search term and filters and re-query immediately.
    pub fn filter(&self, search_term: Option<String>, filters: Vec<ItemsFilter>) -> Result<()> {
        {
            let mut search = lock(&self.inner.search);
            search.search_term = search_term.filter(|term| !term.is_empty());
            search.filters = filters;
        }
        self.inner.requery().map(|_| ())
    }

    /// Switch the sort order, persist it and re-query.
    pub fn change_sort_type(&self, sort: ItemsSortType) -> Result<()> {
        lock(&self.inner.search).sort = sort;
        if let Err(e) = self.inner.preferences.set_items_sort_type(sort) {
            tracing::warn!(error = %e, "could not persist sort type");
        }
        self.inner.requery().map(|_| ())
    }

    /// Sort by `field` in its default direction.
    pub fn set_sort_field(&self, field: SortField) -> Result<()> {
        self.change_sort_type(ItemsSortType::for_field(field))
    }

    pub fn set_sort_direction(&self, ascending: bool) -> Result<()> {
        self.change_sort_type(self.sort_type().with_ascending(ascending))
    }

    pub fn sort_type(&self) -> ItemsSortType {
        lock(&self.inner.search).sort
    }

    /// Start downloads for the main attachments of the given rows.
    ///
    /// Rows without an attachment and attachments already downloading are
    /// skipped.
    pub async fn download_attachments(&self, keys: &[ItemKey]) -> Result<()> {
        let keys = keys.to_vec();
        let lookups = self
            .inner
            .queue
            .request(&self.inner.root, move |state: &ListState| {
                keys.into_iter()
                    .map(|key| {
                        let attachment = state.attachment(&key, None);
                        (key, attachment)
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        for (key, attachment) in lookups {
            let Some(attachment) = attachment else {
                continue;
            };
            let (progress, _) = self
                .inner
                .downloader
                .progress_and_error(&attachment.key, attachment.library_id);
            if progress.is_some() {
                tracing::debug!(%key, "attachment already downloading");
                continue;
            }
            let parent_key = (attachment.key != key).then_some(key.as_str());
            self.inner.downloader.download_if_needed(&attachment, parent_key);
        }
        Ok(())
    }

    /// Delete the downloaded files of the given rows.
    pub fn remove_downloads(&self, keys: &[ItemKey]) {
        self.inner
            .cleanup
            .delete_for_items(keys, &self.inner.scope, self.inner.library_id);
    }

    /// Attachment files were deleted elsewhere.
    pub fn attachment_files_deleted(&self, notification: AttachmentFileDeleted) {
        let _ = self.inner.files_deleted.send(notification);
    }

    /// Open an attachment, downloading it first if needed.
    ///
    /// Calling it again while the download runs cancels the download.
    pub fn open(&self, attachment: &Attachment, parent_key: Option<&str>) {
        let downloader = &self.inner.downloader;
        let (progress, _) = downloader.progress_and_error(&attachment.key, attachment.library_id);
        if progress.is_some() {
            {
                let mut to_open = lock(&self.inner.attachment_to_open);
                if to_open.as_deref() == Some(attachment.key.as_str()) {
                    *to_open = None;
                }
            }
            downloader.cancel(&attachment.key, attachment.library_id);
        } else {
            *lock(&self.inner.attachment_to_open) = Some(attachment.key.clone());
            downloader.download_if_needed(attachment, parent_key);
        }
    }

    /// Attachment cached for a visible row.
    pub async fn attachment(&self, key: &str, parent_key: Option<&str>) -> Result<Option<Attachment>> {
        let key = key.to_string();
        let parent_key = parent_key.map(str::to_string);
        self.inner
            .queue
            .request(&self.inner.root, move |state: &ListState| {
                state.attachment(&key, parent_key.as_deref())
            })
            .await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ItemsSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ItemsSnapshot> {
        self.inner.snapshots.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.controller.generation()
    }

    pub fn library_id(&self) -> LibraryId {
        self.inner.library_id
    }

    /// Tear everything down. The engine is unusable afterwards.
    pub fn clear(&self) {
        self.inner.controller.clear();
        lock(&self.inner.debouncer).take();
        self.inner.root.cancel();
        tracing::info!(library = %self.inner.library_id, "item list cleared");
    }
}

/// Fold downloader events into the list and open finished attachments.
async fn download_events(
    mut updates: broadcast::Receiver<DownloadUpdate>,
    downloader: Arc<dyn AttachmentDownloader>,
    queue: UpdateQueue<ListState>,
    attachment_to_open: Arc<Mutex<Option<ItemKey>>>,
    token: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = token.cancelled() => break,
            update = updates.recv() => match update {
                Ok(update) => update,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "download events lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let batch = downloader.batch_data();
        let open = update.kind.is_terminal() && {
            let mut to_open = lock(&attachment_to_open);
            let matches = to_open.as_deref() == Some(update.key.as_str());
            if matches {
                *to_open = None;
            }
            matches
        };

        let submitted = queue.submit(&token, "download", move |state: &mut ListState| {
            state.on_download(&update, batch);
            if open && update.kind == DownloadKind::Ready {
                state.show_attachment(&update.key, update.parent_key.as_deref());
            }
            async {}.boxed()
        });
        if submitted.is_err() {
            break;
        }
    }
    tracing::debug!("download event listener stopped");
}

/// Debounced file deletion notifications; the latest one wins.
async fn deleted_files(
    mut notifications: mpsc::UnboundedReceiver<AttachmentFileDeleted>,
    scope: CollectionScope,
    quiet: Duration,
    queue: UpdateQueue<ListState>,
    token: CancellationToken,
) {
    loop {
        let settled = tokio::select! {
            _ = token.cancelled() => break,
            settled = debounce(&mut notifications, quiet) => settled,
        };
        let Some(notification) = settled else { break };

        let keys = match notification {
            AttachmentFileDeleted::AllForItems { keys, collection } if collection == scope => keys,
            AttachmentFileDeleted::AllForItems { collection, .. } => {
                tracing::trace!(?collection, "file deletion for another collection");
                continue;
            }
            AttachmentFileDeleted::Individual { key, parent_key } => vec![parent_key.unwrap_or(key)],
        };
        let submitted = queue.submit(&token, "files deleted", move |state: &mut ListState| {
            state.files_deleted(&keys);
            async {}.boxed()
        });
        if submitted.is_err() {
            break;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
