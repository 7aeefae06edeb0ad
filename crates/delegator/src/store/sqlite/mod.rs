//! SQLite-backed store.
//!
//! Objects are kept as JSON bodies keyed by (kind, namespace, name) and
//! stamped with a database-wide revision counter. Removed objects stay behind
//! as tombstones for a while so the change poller can publish their final
//! revision.
//!
//! SQLite has no push notifications, so the change feed is poll-based: a
//! background task publishes every row whose revision is newer than its
//! cursor. Local writes wake the poller immediately; writes from other
//! processes are picked up on the next tick. Revisions written between two
//! polls collapse into the latest one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{apply_create, apply_delete, apply_status, apply_update, Applied, ResourceStore, StoreQuery};
use super::feed::{ChangeFeed, Subscription};
use crate::pagination::{Page, SkipToken};
use crate::repository::RepositoryError;
use crate::resource::{Object, ObjectKey};

mod database;
mod migrations;

pub use database::{Database, DatabaseError};

type Result<T> = std::result::Result<T, RepositoryError>;

/// Tombstones are purged every this many polls.
const PURGE_EVERY_TICKS: u64 = 120;

pub struct SqliteStore<T: Object> {
    db: Database,
    feed: ChangeFeed<T>,
    /// Last revision published by the poller. Held while polling and while
    /// registering a subscription.
    cursor: Arc<Mutex<u64>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl<T: Object> SqliteStore<T> {
    /// Creates the store and starts its change poller. Must be called from
    /// within a Tokio runtime.
    pub fn new(db: Database, poll_interval: Duration) -> std::result::Result<Self, DatabaseError> {
        let start = db.with_conn(|conn| max_revision(conn, T::KIND).map_err(DatabaseError::from))?;
        let store = Self {
            db,
            feed: ChangeFeed::new(),
            cursor: Arc::new(Mutex::new(start)),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(poll_changes(
            store.db.clone(),
            store.feed.clone(),
            Arc::clone(&store.cursor),
            Arc::clone(&store.wake),
            store.shutdown.clone(),
            poll_interval,
        ));
        log::info!(
            "SQLite store for {} polling changes every {:?}",
            T::KIND,
            poll_interval
        );

        Ok(store)
    }

    /// Number of live change handlers.
    pub fn handler_count(&self) -> usize {
        self.feed.handler_count()
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| RepositoryError::Unavailable(format!("store task failed: {}", e)))?
    }

    /// Runs `op` against the live row for `key` inside one transaction and
    /// persists its outcome.
    async fn mutate<F>(&self, key: ObjectKey, op: F) -> Result<Applied<T>>
    where
        F: FnOnce(Option<T>, u64) -> Result<Applied<T>> + Send + 'static,
    {
        let applied = self
            .blocking(move |db| {
                db.with_conn(|conn| {
                    let tx = conn.unchecked_transaction()?;
                    let current = load_live::<T>(&tx, &key)?;
                    let revision = max_assigned_revision(&tx)? + 1;
                    let applied = op(current, revision)?;
                    match &applied {
                        Applied::Stored(obj) => write_row(&tx, obj, false, revision)?,
                        Applied::Removed(obj) => write_row(&tx, obj, true, revision)?,
                        Applied::Unchanged(_) => {}
                    }
                    tx.commit()?;
                    Ok(applied)
                })
            })
            .await?;

        if !matches!(applied, Applied::Unchanged(_)) {
            self.wake.notify_one();
        }
        Ok(applied)
    }
}

impl<T: Object> Drop for SqliteStore<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl<T: Object> ResourceStore<T> for SqliteStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        let key = key.clone();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                load_live::<T>(conn, &key)?.ok_or_else(|| RepositoryError::not_found(T::KIND, key.clone()))
            })
        })
        .await
    }

    async fn list(&self, query: &StoreQuery) -> Result<Page<T>> {
        let after = match &query.continue_token {
            Some(token) => token.cursor()?,
            None => ObjectKey::default(),
        };
        let query = query.clone();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM resources
                     WHERE kind = ?1 AND deleted = 0
                       AND (?2 IS NULL OR namespace = ?2)
                       AND (namespace, name) > (?3, ?4)
                     ORDER BY namespace, name",
                )?;
                let mut rows = stmt.query(params![T::KIND, query.namespace, after.namespace, after.name])?;

                let mut items: Vec<T> = Vec::new();
                let mut next = None;
                while let Some(row) = rows.next()? {
                    let body: String = row.get(0)?;
                    let obj: T = serde_json::from_str(&body)?;
                    if !query.admits(&obj) {
                        continue;
                    }
                    if items.len() == query.limit {
                        if let Some(last) = items.last() {
                            next = Some(SkipToken::after(&last.key())?);
                        }
                        break;
                    }
                    items.push(obj);
                }
                Ok(Page { items, next })
            })
        })
        .await
    }

    async fn create(&self, obj: T) -> Result<T> {
        match self
            .mutate(obj.key(), move |current, revision| {
                apply_create(current.as_ref(), obj, revision).map(Applied::Stored)
            })
            .await?
        {
            Applied::Stored(obj) | Applied::Removed(obj) | Applied::Unchanged(obj) => Ok(obj),
        }
    }

    async fn update(&self, obj: T) -> Result<T> {
        let key = obj.key();
        match self
            .mutate(key.clone(), move |current, revision| {
                let current = current.ok_or_else(|| RepositoryError::not_found(T::KIND, key))?;
                apply_update(&current, obj, revision)
            })
            .await?
        {
            Applied::Stored(obj) | Applied::Removed(obj) | Applied::Unchanged(obj) => Ok(obj),
        }
    }

    async fn update_status(&self, obj: T) -> Result<T> {
        let key = obj.key();
        match self
            .mutate(key.clone(), move |current, revision| {
                let current = current.ok_or_else(|| RepositoryError::not_found(T::KIND, key))?;
                apply_status(&current, &obj, revision).map(Applied::Stored)
            })
            .await?
        {
            Applied::Stored(obj) | Applied::Removed(obj) | Applied::Unchanged(obj) => Ok(obj),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>> {
        let missing = key.clone();
        match self
            .mutate(key.clone(), move |current, revision| {
                let current = current.ok_or_else(|| RepositoryError::not_found(T::KIND, missing))?;
                Ok(apply_delete(&current, revision))
            })
            .await?
        {
            Applied::Stored(obj) | Applied::Unchanged(obj) => Ok(Some(obj)),
            Applied::Removed(_) => Ok(None),
        }
    }

    async fn subscribe(&self, key: &ObjectKey) -> Result<Subscription<T>> {
        let key = key.clone();
        let feed = self.feed.clone();
        let cursor = Arc::clone(&self.cursor);
        self.blocking(move |db| {
            let _cursor = cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let (snapshot, after) = db.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let after = max_revision(&tx, T::KIND)?;
                let mut stmt = tx.prepare(
                    "SELECT body FROM resources
                     WHERE kind = ?1 AND deleted = 0
                       AND (?2 = '' OR namespace = ?2)
                       AND (?3 = '' OR name = ?3)
                     ORDER BY namespace, name",
                )?;
                let snapshot = stmt
                    .query_map(params![T::KIND, key.namespace, key.name], |row| row.get::<_, String>(0))?
                    .map(|body| -> Result<T> { Ok(serde_json::from_str(&body?)?) })
                    .collect::<Result<Vec<T>>>()?;
                Ok::<_, RepositoryError>((snapshot, after))
            })?;
            Ok(feed.subscribe(key, snapshot, after))
        })
        .await
    }
}

fn max_revision(conn: &Connection, kind: &str) -> rusqlite::Result<u64> {
    let revision: i64 = conn.query_row(
        "SELECT COALESCE(MAX(revision), 0) FROM resources WHERE kind = ?1",
        params![kind],
        |r| r.get(0),
    )?;
    Ok(revision as u64)
}

fn max_assigned_revision(conn: &Connection) -> rusqlite::Result<u64> {
    let revision: i64 =
        conn.query_row("SELECT value FROM revision_counter WHERE id = 1", [], |r| r.get(0))?;
    Ok(revision as u64)
}

fn load_live<T: Object>(conn: &Connection, key: &ObjectKey) -> Result<Option<T>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM resources
             WHERE kind = ?1 AND namespace = ?2 AND name = ?3 AND deleted = 0",
            params![T::KIND, key.namespace, key.name],
            |r| r.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b)).transpose().map_err(Into::into)
}

fn write_row<T: Object>(conn: &Connection, obj: &T, deleted: bool, revision: u64) -> Result<()> {
    let key = obj.key();
    let body = serde_json::to_string(obj)?;
    conn.execute(
        "INSERT INTO resources (kind, namespace, name, revision, deleted, body, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT (kind, namespace, name) DO UPDATE SET
             revision = excluded.revision,
             deleted = excluded.deleted,
             body = excluded.body,
             updated_at = excluded.updated_at",
        params![T::KIND, key.namespace, key.name, revision as i64, deleted, body],
    )?;
    conn.execute(
        "UPDATE revision_counter SET value = ?1 WHERE id = 1",
        params![revision as i64],
    )?;
    Ok(())
}

/// Publishes every row newer than the cursor, in revision order.
fn publish_since<T: Object>(
    db: &Database,
    feed: &ChangeFeed<T>,
    cursor: &Mutex<u64>,
    purge: bool,
) -> Result<usize> {
    let mut cursor = cursor.lock().unwrap_or_else(PoisonError::into_inner);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT revision, body FROM resources
             WHERE kind = ?1 AND revision > ?2
             ORDER BY revision",
        )?;
        let rows = stmt
            .query_map(params![T::KIND, *cursor as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let published = rows.len();
        for (revision, body) in rows {
            match serde_json::from_str::<T>(&body) {
                Ok(obj) => feed.publish(&obj),
                Err(e) => log::warn!("Skipping undecodable {} row at revision {}: {}", T::KIND, revision, e),
            }
            *cursor = revision as u64;
        }

        if purge {
            let purged = conn.execute(
                "DELETE FROM resources
                 WHERE kind = ?1 AND deleted = 1 AND revision <= ?2
                   AND updated_at < datetime('now', '-10 minutes')",
                params![T::KIND, *cursor as i64],
            )?;
            if purged > 0 {
                log::debug!("Purged {} {} tombstones", purged, T::KIND);
            }
        }
        Ok(published)
    })
}

async fn poll_changes<T: Object>(
    db: Database,
    feed: ChangeFeed<T>,
    cursor: Arc<Mutex<u64>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        ticks += 1;
        let purge = ticks % PURGE_EVERY_TICKS == 0;

        let (db, feed, cursor) = (db.clone(), feed.clone(), Arc::clone(&cursor));
        match tokio::task::spawn_blocking(move || publish_since(&db, &feed, &cursor, purge)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(count)) => log::trace!("Published {} {} revisions", count, T::KIND),
            Ok(Err(e)) => log::warn!("Change poll for {} failed: {}", T::KIND, e),
            Err(e) => log::error!("Change poll task for {} panicked: {}", T::KIND, e),
        }
    }
    log::debug!("Change poller for {} stopped", T::KIND);
}
