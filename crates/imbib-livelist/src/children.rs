//! Per-row child listeners
//!
//! Every visible row gets one live subscription on its children. A child
//! change is turned into a single-row refresh on the update queue instead of
//! a full reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use imbib_items::{ItemKey, ItemRecord, LiveStore, Notification, SubscriptionGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::UpdateQueue;
use crate::reconcile::RowListeners;
use crate::state::ListState;

struct ChildListener {
    _guard: SubscriptionGuard,
    forwarder: JoinHandle<()>,
}

impl Drop for ChildListener {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct ChildListenerMesh {
    store: Arc<dyn LiveStore>,
    queue: UpdateQueue<ListState>,
    listeners: Mutex<HashMap<ItemKey, ChildListener>>,
}

impl ChildListenerMesh {
    pub fn new(store: Arc<dyn LiveStore>, queue: UpdateQueue<ListState>) -> Self {
        Self {
            store,
            queue,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Start listening to the children of `record`.
    ///
    /// Refused once `token` is cancelled; the check happens under the mesh
    /// lock, so it cannot race with [`ChildListenerMesh::detach_all`].
    pub fn attach(&self, record: &Arc<ItemRecord>, token: &CancellationToken) {
        let mut listeners = self.lock();
        if token.is_cancelled() || listeners.contains_key(&record.key) {
            return;
        }

        let subscription = match self
            .store
            .children(record.library_id, &record.key)
            .and_then(|results| results.subscribe())
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(key = %record.key, error = %e, "could not observe children");
                return;
            }
        };
        let (guard, mut receiver) = subscription.into_parts();

        let queue = self.queue.clone();
        let token = token.clone();
        let parent_key = record.key.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                let children = match notification {
                    Notification::Initial { snapshot, .. } | Notification::Update { snapshot, .. } => snapshot,
                    Notification::Error(e) => {
                        tracing::warn!(key = %parent_key, error = %e, "child listener failed");
                        break;
                    }
                };
                let key = parent_key.clone();
                let submitted = queue.submit(&token, "children", move |state: &mut ListState| {
                    state.refresh_children(&key, children);
                    async {}.boxed()
                });
                if submitted.is_err() {
                    break;
                }
            }
        });

        listeners.insert(
            record.key.clone(),
            ChildListener {
                _guard: guard,
                forwarder,
            },
        );
    }

    pub fn detach(&self, key: &str) {
        let removed = self.lock().remove(key);
        drop(removed);
    }

    pub fn detach_all(&self) {
        let drained = std::mem::take(&mut *self.lock());
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "detaching child listeners");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemKey, ChildListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RowListeners for ChildListenerMesh {
    fn attach(&self, record: &Arc<ItemRecord>, token: &CancellationToken) {
        ChildListenerMesh::attach(self, record, token);
    }

    fn detach(&self, key: &str) {
        ChildListenerMesh::detach(self, key);
    }
}
