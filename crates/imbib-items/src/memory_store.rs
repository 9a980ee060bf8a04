use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::change_set::{ChangeSet, FrozenResults, Notification};
use crate::item::{ItemKey, ItemRecord, LibraryId};
use crate::query::ItemsQuery;
use crate::store::{LiveResults, LiveStore, StoreError, Subscription, SubscriptionId};

/// In-memory implementation of the LiveStore trait.
///
/// Every committed transaction re-evaluates the registered live results and
/// delivers a change-set to each one whose keys or own record versions
/// changed. A parent's position in a top-level result only reacts to the
/// parent's own writes; child writes are seen by child subscriptions.
#[derive(Clone, Default)]
pub struct MemoryLibrary {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    next_subscription: AtomicU64,
}

#[derive(Default)]
struct State {
    items: BTreeMap<ItemKey, Stored>,
    version: u64,
    listeners: HashMap<SubscriptionId, Listener>,
}

#[derive(Clone)]
struct Stored {
    record: ItemRecord,
    version: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Query(ItemsQuery),
    Children {
        library_id: LibraryId,
        parent_key: ItemKey,
    },
}

struct Listener {
    source: Source,
    last: Vec<(ItemKey, u64)>,
    sender: mpsc::UnboundedSender<Notification>,
}

/// Staged writes applied by [`MemoryLibrary::transaction`].
pub struct Transaction<'a> {
    items: &'a mut BTreeMap<ItemKey, Stored>,
    version: u64,
}

impl Transaction<'_> {
    pub fn insert(&mut self, mut record: ItemRecord) -> Result<(), StoreError> {
        if self.items.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key));
        }
        record.children.clear();
        self.items.insert(
            record.key.clone(),
            Stored {
                record,
                version: self.version,
            },
        );
        Ok(())
    }

    pub fn update(
        &mut self,
        key: &str,
        mutate: impl FnOnce(&mut ItemRecord),
    ) -> Result<(), StoreError> {
        let stored = self
            .items
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        mutate(&mut stored.record);
        stored.record.key = key.to_string();
        stored.record.children.clear();
        stored.version = self.version;
        Ok(())
    }

    /// Delete an item and, recursively, its children.
    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        if self.items.remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let children: Vec<ItemKey> = self
            .items
            .values()
            .filter(|s| s.record.parent_key.as_deref() == Some(key))
            .map(|s| s.record.key.clone())
            .collect();
        for child in children {
            self.delete(&child)?;
        }
        Ok(())
    }
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of writes atomically and notify live results once.
    pub fn transaction<T>(
        &self,
        write: impl FnOnce(&mut Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.inner.lock()?;
        let version = state.version + 1;
        let mut staged = state.items.clone();
        let value = write(&mut Transaction {
            items: &mut staged,
            version,
        })?;
        state.items = staged;
        state.version = version;
        state.notify();
        Ok(value)
    }

    pub fn insert(&self, record: ItemRecord) -> Result<(), StoreError> {
        self.transaction(|txn| txn.insert(record))
    }

    pub fn insert_all(&self, records: impl IntoIterator<Item = ItemRecord>) -> Result<(), StoreError> {
        self.transaction(|txn| records.into_iter().try_for_each(|r| txn.insert(r)))
    }

    pub fn update(&self, key: &str, mutate: impl FnOnce(&mut ItemRecord)) -> Result<(), StoreError> {
        self.transaction(|txn| txn.update(key, mutate))
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.transaction(|txn| txn.delete(key))
    }

    /// Current record with its children materialized.
    pub fn get(&self, key: &str) -> Result<Option<ItemRecord>, StoreError> {
        let state = self.inner.lock()?;
        let index = state.children_index();
        Ok(state
            .items
            .get(key)
            .map(|s| state.materialize(&s.record, &index)))
    }

    /// Kill every top-level live query with an error notification.
    pub fn fail_live_queries(&self, reason: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock()?;
        let failed: Vec<SubscriptionId> = state
            .listeners
            .iter()
            .filter(|(_, l)| matches!(l.source, Source::Query(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in failed {
            if let Some(listener) = state.listeners.remove(&id) {
                tracing::debug!(%id, reason, "failing live query");
                let _ = listener
                    .sender
                    .send(Notification::Error(StoreError::Notification(reason.to_string())));
            }
        }
        Ok(())
    }

    /// Number of live top-level query listeners.
    pub fn live_query_count(&self) -> usize {
        self.inner
            .lock_unchecked()
            .listeners
            .values()
            .filter(|l| matches!(l.source, Source::Query(_)))
            .count()
    }

    /// Parent keys with a live child listener, one entry per listener.
    pub fn child_listener_parents(&self) -> Vec<ItemKey> {
        let mut parents: Vec<ItemKey> = self
            .inner
            .lock_unchecked()
            .listeners
            .values()
            .filter_map(|l| match &l.source {
                Source::Children { parent_key, .. } => Some(parent_key.clone()),
                Source::Query(_) => None,
            })
            .collect();
        parents.sort();
        parents
    }

    fn results(&self, source: Source) -> Arc<dyn LiveResults> {
        Arc::new(MemoryResults {
            inner: Arc::clone(&self.inner),
            source,
        })
    }
}

impl LiveStore for MemoryLibrary {
    fn query(&self, query: &ItemsQuery) -> Result<Arc<dyn LiveResults>, StoreError> {
        if query.search_components.iter().any(|c| c.trim().is_empty()) {
            return Err(StoreError::InvalidQuery("empty search component".into()));
        }
        Ok(self.results(Source::Query(query.clone())))
    }

    fn children(
        &self,
        library_id: LibraryId,
        parent_key: &str,
    ) -> Result<Arc<dyn LiveResults>, StoreError> {
        Ok(self.results(Source::Children {
            library_id,
            parent_key: parent_key.to_string(),
        }))
    }
}

struct MemoryResults {
    inner: Arc<Inner>,
    source: Source,
}

impl LiveResults for MemoryResults {
    fn freeze(&self) -> FrozenResults {
        let state = self.inner.lock_unchecked();
        FrozenResults::new(state.evaluate(&self.source).0)
    }

    fn subscribe(&self) -> Result<Subscription, StoreError> {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut state = self.inner.lock()?;
        let (records, last) = state.evaluate(&self.source);
        let _ = sender.send(Notification::Initial {
            snapshot: FrozenResults::new(records),
            changes: ChangeSet::default(),
        });
        state.listeners.insert(
            id,
            Listener {
                source: self.source.clone(),
                last,
                sender,
            },
        );
        drop(state);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock_unchecked().listeners.remove(&id);
            }
        }))
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn lock_unchecked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn children_index(&self) -> HashMap<&str, Vec<&Stored>> {
        let mut index: HashMap<&str, Vec<&Stored>> = HashMap::new();
        for stored in self.items.values() {
            if let Some(parent) = stored.record.parent_key.as_deref() {
                index.entry(parent).or_default().push(stored);
            }
        }
        for children in index.values_mut() {
            children.sort_by(|a, b| {
                a.record
                    .date_added
                    .cmp(&b.record.date_added)
                    .then_with(|| a.record.key.cmp(&b.record.key))
            });
        }
        index
    }

    fn materialize(&self, record: &ItemRecord, index: &HashMap<&str, Vec<&Stored>>) -> ItemRecord {
        let children = index
            .get(record.key.as_str())
            .map(|children| {
                children
                    .iter()
                    .map(|c| Arc::new(self.materialize(&c.record, index)))
                    .collect()
            })
            .unwrap_or_default();
        record.with_children(children)
    }

    fn evaluate(&self, source: &Source) -> (Vec<Arc<ItemRecord>>, Vec<(ItemKey, u64)>) {
        let index = self.children_index();
        let mut rows: Vec<(ItemRecord, u64)> = match source {
            Source::Query(query) => self
                .items
                .values()
                .filter(|s| s.record.is_top_level() && s.record.library_id == query.library_id)
                .map(|s| (self.materialize(&s.record, &index), s.version))
                .filter(|(record, _)| query.matches(record))
                .collect(),
            Source::Children {
                library_id,
                parent_key,
            } => index
                .get(parent_key.as_str())
                .map(|children| {
                    children
                        .iter()
                        .filter(|s| s.record.library_id == *library_id)
                        .map(|s| (self.materialize(&s.record, &index), s.version))
                        .collect()
                })
                .unwrap_or_default(),
        };
        if let Source::Query(query) = source {
            rows.sort_by(|a, b| query.sort.compare(&a.0, &b.0));
        }
        let keys = rows.iter().map(|(r, v)| (r.key.clone(), *v)).collect();
        let records = rows.into_iter().map(|(r, _)| Arc::new(r)).collect();
        (records, keys)
    }

    fn notify(&mut self) {
        let mut updates = Vec::new();
        for (id, listener) in &self.listeners {
            let (records, keys) = self.evaluate(&listener.source);
            let changes = ChangeSet::between(&listener.last, &keys);
            if !changes.is_empty() {
                updates.push((*id, records, keys, changes));
            }
        }

        for (id, records, keys, changes) in updates {
            let Some(listener) = self.listeners.get_mut(&id) else {
                continue;
            };
            tracing::trace!(%id, shape = %changes.shape(), "delivering change-set");
            listener.last = keys;
            let delivered = listener.sender.send(Notification::Update {
                snapshot: FrozenResults::new(records),
                changes,
            });
            if delivered.is_err() {
                self.listeners.remove(&id);
            }
        }
    }
}
