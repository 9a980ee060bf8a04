use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::change_set::{FrozenResults, Notification};
use crate::item::{ItemKey, LibraryId};
use crate::query::ItemsQuery;

/// Identifies one registered listener on a live result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// The trait that live-query backends implement.
pub trait LiveStore: Send + Sync {
    /// Issue a live query. Nothing is delivered until the result is subscribed to.
    fn query(&self, query: &ItemsQuery) -> Result<Arc<dyn LiveResults>, StoreError>;

    /// Live set of the children (attachments, notes) of one item.
    fn children(
        &self,
        library_id: LibraryId,
        parent_key: &str,
    ) -> Result<Arc<dyn LiveResults>, StoreError>;
}

/// A result set the store keeps current.
pub trait LiveResults: Send + Sync {
    /// Point-in-time copy of the current result.
    fn freeze(&self) -> FrozenResults;

    /// Register for change notifications. The first delivery is always
    /// [`Notification::Initial`].
    fn subscribe(&self) -> Result<Subscription, StoreError>;
}

/// Handle for one live listener.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) unregisters the
/// listener before returning; no notification is queued for it afterwards.
pub struct Subscription {
    guard: SubscriptionGuard,
    receiver: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        receiver: mpsc::UnboundedReceiver<Notification>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            guard: SubscriptionGuard {
                id,
                release: Some(Box::new(release)),
            },
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.guard.id
    }

    /// Next notification, or `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn cancel(self) {
        drop(self);
    }

    /// Split into the registration guard and the notification stream, so
    /// one owner can unregister while another task reads.
    pub fn into_parts(self) -> (SubscriptionGuard, mpsc::UnboundedReceiver<Notification>) {
        (self.guard, self.receiver)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.guard.id).finish()
    }
}

/// Keeps a store-side listener registered until dropped.
pub struct SubscriptionGuard {
    id: SubscriptionId,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard").field("id", &self.id).finish()
    }
}

/// Errors from the item store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(ItemKey),

    #[error("Item already exists: {0}")]
    AlreadyExists(ItemKey),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Live query failed: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
