//! Result set lifecycle
//!
//! Owns the one live top-level subscription. A new query tears the previous
//! one down completely (generation token, child listeners, store listener,
//! forwarder) before anything of the new query is queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use imbib_items::{
    CollectionScope, ItemsFilter, ItemsQuery, ItemsSortType, LibraryId, LiveStore, Notification,
    SubscriptionGuard, SubscriptionId,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::children::ChildListenerMesh;
use crate::error::{ItemsError, Result};
use crate::queue::UpdateQueue;
use crate::search::search_components;
use crate::snapshot::GenerationGate;
use crate::state::ListState;

#[derive(Default)]
struct Generation {
    number: u64,
    token: Option<CancellationToken>,
    guard: Option<SubscriptionGuard>,
    forwarder: Option<JoinHandle<()>>,
}

impl Generation {
    fn teardown(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.guard.take();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

pub struct ResultSetController {
    store: Arc<dyn LiveStore>,
    queue: UpdateQueue<ListState>,
    mesh: Arc<ChildListenerMesh>,
    gate: GenerationGate,
    library_id: LibraryId,
    scope: CollectionScope,
    root: CancellationToken,
    current: Mutex<Generation>,
}

impl ResultSetController {
    pub fn new(
        store: Arc<dyn LiveStore>,
        queue: UpdateQueue<ListState>,
        mesh: Arc<ChildListenerMesh>,
        gate: GenerationGate,
        library_id: LibraryId,
        scope: CollectionScope,
        root: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            mesh,
            gate,
            library_id,
            scope,
            root,
            current: Mutex::new(Generation::default()),
        }
    }

    /// Replace the live query.
    ///
    /// Returns once the previous subscription and all child listeners are
    /// released and the new list reset is queued. From then on nothing of
    /// the previous generation is published. Store failures are
    /// published as a failed load and returned.
    pub fn set_query(
        &self,
        search_text: Option<&str>,
        filters: &[ItemsFilter],
        sort: ItemsSortType,
    ) -> Result<SubscriptionId> {
        let mut current = self.lock();
        current.teardown();
        self.mesh.detach_all();

        current.number += 1;
        let generation = current.number;
        self.gate.advance(generation);
        let token = self.root.child_token();
        current.token = Some(token.clone());

        let query = self.build_query(search_text, filters, sort);
        tracing::info!(
            generation,
            scope = ?query.collection,
            components = query.search_components.len(),
            filters = query.filters.len(),
            "issuing items query"
        );

        self.queue.submit(&token, "reset", move |state: &mut ListState| {
            state.reset(generation);
            async {}.boxed()
        })?;

        let subscription = match self.store.query(&query).and_then(|results| results.subscribe()) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(generation, ?query, error = %e, "items query failed");
                let error = ItemsError::DataLoading(e.to_string());
                self.queue.submit(&token, "fail", move |state: &mut ListState| {
                    state.fail(error);
                    async {}.boxed()
                })?;
                return Err(e.into());
            }
        };

        let id = subscription.id();
        let (guard, receiver) = subscription.into_parts();
        current.guard = Some(guard);
        current.forwarder = Some(tokio::spawn(forward(
            receiver,
            self.queue.clone(),
            Arc::clone(&self.mesh),
            token,
            generation,
        )));
        Ok(id)
    }

    /// Release everything the current query holds.
    pub fn clear(&self) {
        self.lock().teardown();
        self.mesh.detach_all();
    }

    pub fn generation(&self) -> u64 {
        self.lock().number
    }

    fn build_query(
        &self,
        search_text: Option<&str>,
        filters: &[ItemsFilter],
        sort: ItemsSortType,
    ) -> ItemsQuery {
        let mut query = ItemsQuery::new(self.library_id, self.scope.clone());
        query.filters = filters.to_vec();
        query.sort = sort;
        query.search_components = search_text
            .filter(|text| !text.is_empty())
            .map(search_components)
            .unwrap_or_default();
        query
    }

    fn lock(&self) -> MutexGuard<'_, Generation> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ResultSetController {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Move store notifications of one generation onto the update queue.
async fn forward(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    queue: UpdateQueue<ListState>,
    mesh: Arc<ChildListenerMesh>,
    token: CancellationToken,
    generation: u64,
) {
    loop {
        let notification = tokio::select! {
            _ = token.cancelled() => break,
            notification = receiver.recv() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };
        tracing::trace!(generation, kind = notification.kind(), "store notification");
        let last = matches!(notification, Notification::Error(_));

        let mesh = Arc::clone(&mesh);
        let job_token = token.clone();
        let submitted = queue.submit(&token, "reconcile", move |state: &mut ListState| {
            async move {
                state
                    .apply_notification(notification, &job_token, &*mesh)
                    .await
            }
            .boxed()
        });
        if submitted.is_err() || last {
            break;
        }
    }
    tracing::debug!(generation, "notification forwarder finished");
}
