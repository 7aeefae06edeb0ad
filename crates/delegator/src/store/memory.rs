//! In-process store ordered by object key.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{apply_create, apply_delete, apply_status, apply_update, Applied, ResourceStore, StoreQuery};
use super::feed::{ChangeFeed, Subscription};
use crate::pagination::{Page, SkipToken};
use crate::repository::RepositoryError;
use crate::resource::{Object, ObjectKey};

type Result<T> = std::result::Result<T, RepositoryError>;

struct MemoryState<T> {
    objects: BTreeMap<ObjectKey, T>,
    revision: u64,
}

/// Store backed by an ordered map. Writes and change publication happen
/// under one lock, so subscribers observe revisions in write order.
pub struct MemoryStore<T: Object> {
    state: Mutex<MemoryState<T>>,
    feed: ChangeFeed<T>,
}

impl<T: Object> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                revision: 0,
            }),
            feed: ChangeFeed::new(),
        }
    }

    /// Number of live change handlers.
    pub fn handler_count(&self) -> usize {
        self.feed.handler_count()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState<T>>> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".into()))
    }

    fn commit(&self, state: &mut MemoryState<T>, applied: Applied<T>) -> Option<T> {
        match applied {
            Applied::Stored(obj) => {
                state.revision = obj.meta().resource_version;
                state.objects.insert(obj.key(), obj.clone());
                self.feed.publish(&obj);
                Some(obj)
            }
            Applied::Removed(obj) => {
                state.revision = obj.meta().resource_version;
                state.objects.remove(&obj.key());
                self.feed.publish(&obj);
                log::debug!("Removed {} '{}'", T::KIND, obj.key());
                None
            }
            Applied::Unchanged(obj) => Some(obj),
        }
    }
}

#[async_trait]
impl<T: Object> ResourceStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        self.lock()?
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(T::KIND, key.clone()))
    }

    async fn list(&self, query: &StoreQuery) -> Result<Page<T>> {
        let lower = match &query.continue_token {
            Some(token) => Excluded(token.cursor()?),
            None => Unbounded,
        };
        let state = self.lock()?;
        let mut items = Vec::new();
        let mut next = None;
        for obj in state
            .objects
            .range((lower, Unbounded))
            .map(|(_, obj)| obj)
            .filter(|obj| query.admits(*obj))
        {
            if items.len() == query.limit {
                if let Some(last) = items.last() {
                    next = Some(SkipToken::after(&Object::key(last))?);
                }
                break;
            }
            items.push(obj.clone());
        }
        Ok(Page { items, next })
    }

    async fn create(&self, obj: T) -> Result<T> {
        let mut state = self.lock()?;
        let revision = state.revision + 1;
        let created = apply_create(state.objects.get(&obj.key()), obj, revision)?;
        self.commit(&mut state, Applied::Stored(created.clone()));
        Ok(created)
    }

    async fn update(&self, obj: T) -> Result<T> {
        let mut state = self.lock()?;
        let key = obj.key();
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| RepositoryError::not_found(T::KIND, key.clone()))?;
        let revision = state.revision + 1;
        let applied = apply_update(current, obj, revision)?;
        let last = match &applied {
            Applied::Stored(o) | Applied::Removed(o) | Applied::Unchanged(o) => o.clone(),
        };
        self.commit(&mut state, applied);
        Ok(last)
    }

    async fn update_status(&self, obj: T) -> Result<T> {
        let mut state = self.lock()?;
        let key = obj.key();
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| RepositoryError::not_found(T::KIND, key.clone()))?;
        let revision = state.revision + 1;
        let updated = apply_status(current, &obj, revision)?;
        self.commit(&mut state, Applied::Stored(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>> {
        let mut state = self.lock()?;
        let current = state
            .objects
            .get(key)
            .ok_or_else(|| RepositoryError::not_found(T::KIND, key.clone()))?;
        let revision = state.revision + 1;
        let applied = apply_delete(current, revision);
        Ok(self.commit(&mut state, applied))
    }

    async fn subscribe(&self, key: &ObjectKey) -> Result<Subscription<T>> {
        let state = self.lock()?;
        let snapshot = state
            .objects
            .values()
            .filter(|obj| key.selects(&obj.key()))
            .cloned()
            .collect();
        Ok(self.feed.subscribe(key.clone(), snapshot, state.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, Scope, WorkspaceSpec};
    use crate::selector::Selector;

    type Ws = Resource<WorkspaceSpec>;

    fn ws(tenant: &str, name: &str) -> Ws {
        Resource::new(name, WorkspaceSpec::default()).with_scope(Scope::tenant(tenant))
    }

    fn query(limit: usize) -> StoreQuery {
        StoreQuery {
            limit,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let store = MemoryStore::new();
        let created = store.create(ws("acme", "dev")).await.unwrap();
        assert_eq!(created.metadata.resource_version, 1);

        let mut changed = created.clone();
        changed.spec.description = Some("development".into());
        let updated = store.update(changed).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);

        let loaded = store.get(&created.key()).await.unwrap();
        assert_eq!(loaded, updated);

        assert!(store.delete(&created.key()).await.unwrap().is_none());
        assert!(store.get(&created.key()).await.unwrap_err().is_not_found());
        assert!(store.delete(&created.key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(ws("acme", "dev")).await.unwrap();
        store.update(created.clone()).await.unwrap();

        let err = store.update(created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_pages_in_key_order() {
        let store = MemoryStore::new();
        for name in ["c", "a", "b"] {
            store.create(ws("acme", name)).await.unwrap();
        }

        let first = store.list(&query(2)).await.unwrap();
        let names: Vec<_> = first.items.iter().map(|w| w.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let second = store
            .list(&StoreQuery {
                continue_token: first.next,
                ..query(2)
            })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name(), "c");
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_namespace_and_labels() {
        let store = MemoryStore::new();
        store.create(ws("acme", "a").with_label("tier", "prod")).await.unwrap();
        store.create(ws("acme", "b")).await.unwrap();
        store.create(ws("globex", "c").with_label("tier", "prod")).await.unwrap();

        let page = store
            .list(&StoreQuery {
                namespace: Some("acme".into()),
                selector: Selector::parse("tier=prod").unwrap(),
                ..query(10)
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name(), "a");
    }

    #[tokio::test]
    async fn test_subscription_replays_then_follows() {
        let store = MemoryStore::new();
        let created = store.create(ws("acme", "dev")).await.unwrap();

        let mut sub = store.subscribe(&created.key()).await.unwrap();
        assert_eq!(store.handler_count(), 1);
        store.create(ws("acme", "other")).await.unwrap();
        let updated = store.update(created.clone()).await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), created);
        assert_eq!(sub.recv().await.unwrap(), updated);

        drop(sub);
        assert_eq!(store.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_finalizer_blocks_removal_and_publishes_final_revision() {
        let store = MemoryStore::new();
        let mut obj = ws("acme", "dev");
        obj.metadata.add_finalizer("example.com/cleanup");
        let created = store.create(obj).await.unwrap();
        let mut sub = store.subscribe(&created.key()).await.unwrap();
        sub.recv().await.unwrap();

        let terminating = store.delete(&created.key()).await.unwrap().unwrap();
        assert!(terminating.metadata.is_terminating());
        assert!(store.get(&created.key()).await.is_ok());

        let mut released = terminating.clone();
        released.metadata.remove_finalizer("example.com/cleanup");
        let last = store.update(released).await.unwrap();
        assert!(last.metadata.is_removed());
        assert!(store.get(&created.key()).await.unwrap_err().is_not_found());

        assert!(sub.recv().await.unwrap().metadata.is_terminating());
        assert!(sub.recv().await.unwrap().metadata.is_removed());
    }
}
