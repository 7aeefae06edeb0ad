//! Backing store abstraction.
//!
//! A [`ResourceStore`] persists one kind of object with K8s semantics:
//! optimistic concurrency on `resource_version`, spec and status written
//! separately, finalizer-gated deletion, and a per-identity change feed
//! that replays current state on subscribe.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::pagination::{Page, SkipToken};
use crate::repository::RepositoryError;
use crate::resource::{Object, ObjectKey};
use crate::selector::Selector;

pub mod feed;
pub mod memory;
pub mod sqlite;

pub use feed::{ChangeFeed, Subscription};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

type Result<T> = std::result::Result<T, RepositoryError>;

/// A list request as seen by the store.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    /// Only clauses the store can evaluate exactly.
    pub selector: Selector,
    pub limit: usize,
    pub continue_token: Option<SkipToken>,
}

impl StoreQuery {
    pub(crate) fn admits<T: Object>(&self, obj: &T) -> bool {
        let meta = obj.meta();
        self.namespace
            .as_deref()
            .map_or(true, |ns| meta.namespace() == ns)
            && self.selector.matches(&meta.labels)
    }
}

#[async_trait]
pub trait ResourceStore<T: Object>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<T>;

    /// Lists in key order. The returned token continues after the last item.
    async fn list(&self, query: &StoreQuery) -> Result<Page<T>>;

    async fn create(&self, obj: T) -> Result<T>;

    /// Writes everything but the status.
    async fn update(&self, obj: T) -> Result<T>;

    /// Writes only the status.
    async fn update_status(&self, obj: T) -> Result<T>;

    /// Requests deletion. Returns the terminating object while finalizers
    /// remain, `None` once it is gone.
    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>>;

    /// Streams the current revision of every object selected by `key`,
    /// then every later revision, until the subscription is dropped.
    async fn subscribe(&self, key: &ObjectKey) -> Result<Subscription<T>>;
}

/// Result of applying a write to the stored revision.
#[derive(Debug)]
pub(crate) enum Applied<T> {
    Stored(T),
    /// Deletion completed; the object is the final revision.
    Removed(T),
    /// Nothing to write.
    Unchanged(T),
}

fn check_version<T: Object>(current: &T, incoming: &T) -> Result<()> {
    let expected = incoming.meta().resource_version;
    let actual = current.meta().resource_version;
    if expected != 0 && expected != actual {
        return Err(RepositoryError::conflict(
            T::KIND,
            current.key(),
            format!("stale revision {}, current is {}", expected, actual),
        ));
    }
    Ok(())
}

pub(crate) fn apply_create<T: Object>(existing: Option<&T>, mut obj: T, revision: u64) -> Result<T> {
    if obj.meta().name.is_empty() {
        return Err(RepositoryError::Invalid("metadata.name must not be empty".into()));
    }
    obj.meta().scope.validate().map_err(RepositoryError::Invalid)?;
    if existing.is_some() {
        return Err(RepositoryError::conflict(T::KIND, obj.key(), "already exists"));
    }
    let meta = obj.meta_mut();
    if meta.uid.is_empty() {
        meta.uid = Uuid::new_v4().to_string();
    }
    meta.creation_timestamp = Some(Utc::now());
    meta.deletion_timestamp = None;
    meta.generation = 1;
    meta.resource_version = revision;
    Ok(obj)
}

pub(crate) fn apply_update<T: Object>(current: &T, mut obj: T, revision: u64) -> Result<Applied<T>> {
    check_version(current, &obj)?;
    let spec_changed = !current.same_spec(&obj);
    let cur = current.meta();
    let meta = obj.meta_mut();
    meta.uid = cur.uid.clone();
    meta.creation_timestamp = cur.creation_timestamp;
    meta.deletion_timestamp = cur.deletion_timestamp;
    meta.generation = cur.generation + u64::from(spec_changed);
    meta.resource_version = revision;
    obj.set_status(current.status().cloned());

    if obj.meta().is_removed() {
        Ok(Applied::Removed(obj))
    } else {
        Ok(Applied::Stored(obj))
    }
}

pub(crate) fn apply_status<T: Object>(current: &T, obj: &T, revision: u64) -> Result<T> {
    check_version(current, obj)?;
    let mut next = current.clone();
    next.set_status(obj.status().cloned());
    next.meta_mut().resource_version = revision;
    Ok(next)
}

pub(crate) fn apply_delete<T: Object>(current: &T, revision: u64) -> Applied<T> {
    if current.meta().is_terminating() {
        return Applied::Unchanged(current.clone());
    }
    let mut next = current.clone();
    let meta = next.meta_mut();
    meta.deletion_timestamp = Some(Utc::now());
    meta.resource_version = revision;
    if meta.finalizers.is_empty() {
        Applied::Removed(next)
    } else {
        Applied::Stored(next)
    }
}
