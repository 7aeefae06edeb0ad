//! Generic resource repository: CRUD, change subscription and blocking
//! waits over one resource kind.

use async_trait::async_trait;

use crate::context::{Context, ContextError};
use crate::pagination::{ListParams, Page};
use crate::resource::{Object, ObjectKey};
use crate::store::Subscription;

pub mod error;
pub mod generic;

pub use error::{RepositoryError, Result};
pub use generic::GenericRepository;

/// Predicate evaluated against each delivered revision.
pub type Condition<T> = dyn Fn(&T) -> bool + Send + Sync;

/// Change stream for the objects selected by a key. Ends when cancelled,
/// dropped, or when its context is done.
pub struct Watch<T> {
    subscription: Subscription<T>,
    ctx: Context,
}

impl<T> Watch<T> {
    pub fn new(subscription: Subscription<T>, ctx: Context) -> Self {
        Self { subscription, ctx }
    }

    /// Next observed revision, or `None` once the watch has ended.
    pub async fn recv(&mut self) -> Option<T> {
        if !self.subscription.is_active() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.ctx.done() => {
                self.subscription.cancel();
                None
            }
            item = self.subscription.recv() => item,
        }
    }

    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }

    /// Why the watch ended, if its context is done.
    pub fn context_err(&self) -> Option<ContextError> {
        self.ctx.err()
    }
}

#[async_trait]
pub trait Repository<T: Object>: Send + Sync {
    async fn load(&self, ctx: &Context, key: &ObjectKey) -> Result<T>;

    /// Lists one page. `Page::next == None` marks the final page.
    async fn list(&self, ctx: &Context, params: &ListParams) -> Result<Page<T>>;

    async fn create(&self, ctx: &Context, obj: T) -> Result<T>;

    async fn update(&self, ctx: &Context, obj: T) -> Result<T>;

    async fn update_status(&self, ctx: &Context, obj: T) -> Result<T>;

    async fn delete(&self, ctx: &Context, obj: &T) -> Result<()>;

    /// Subscribes to every revision of the objects selected by `key`,
    /// starting with their current state.
    async fn watch(&self, ctx: &Context, key: &ObjectKey) -> Result<Watch<T>>;

    /// Blocks until a revision of `seed`'s identity satisfies `condition`
    /// and returns exactly that revision.
    ///
    /// The change handler is unregistered before returning on every path.
    async fn wait_until(&self, ctx: &Context, seed: &T, condition: &Condition<T>) -> Result<T> {
        let key = seed.key();
        let mut watch = self
            .watch(ctx, &key)
            .await
            .map_err(|e| match e {
                RepositoryError::WatchSetup(_) | RepositoryError::Cancelled => e,
                RepositoryError::DeadlineExceeded => RepositoryError::ConditionTimeout,
                other => RepositoryError::WatchSetup(other.to_string()),
            })?;

        let outcome = loop {
            match watch.recv().await {
                Some(revision) if condition(&revision) => break Ok(revision),
                Some(revision) => {
                    tracing::trace!(
                        kind = T::KIND,
                        key = %key,
                        revision = revision.meta().resource_version,
                        "revision does not satisfy condition yet"
                    );
                }
                None => {
                    break Err(match watch.context_err() {
                        Some(ContextError::Cancelled) => RepositoryError::Cancelled,
                        Some(ContextError::DeadlineExceeded) => RepositoryError::ConditionTimeout,
                        None => RepositoryError::WatchClosed,
                    })
                }
            }
        };
        watch.cancel();
        outcome
    }
}
