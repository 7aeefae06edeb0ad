//! Repository over any [`ResourceStore`].

use std::sync::Arc;

use async_trait::async_trait;

use super::{Repository, Result, Watch};
use crate::context::Context;
use crate::pagination::{ListParams, Page};
use crate::resource::{Object, ObjectKey};
use crate::selector::Selector;
use crate::store::{ResourceStore, StoreQuery};

pub struct GenericRepository<T: Object> {
    store: Arc<dyn ResourceStore<T>>,
}

impl<T: Object> Clone for GenericRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: Object> GenericRepository<T> {
    pub fn new(store: Arc<dyn ResourceStore<T>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: Object> Repository<T> for GenericRepository<T> {
    async fn load(&self, ctx: &Context, key: &ObjectKey) -> Result<T> {
        ctx.check()?;
        self.store.get(key).await
    }

    async fn list(&self, ctx: &Context, params: &ListParams) -> Result<Page<T>> {
        ctx.check()?;
        let selector = match params.selector.as_deref().map(Selector::parse).transpose() {
            Ok(selector) => selector.unwrap_or_default(),
            Err(e) => {
                // An unusable selector selects nothing.
                tracing::warn!(kind = T::KIND, error = %e, "ignoring list with invalid selector");
                return Ok(Page::empty());
            }
        };
        let (store_side, caller_side) = selector.split();

        let query = StoreQuery {
            namespace: (!params.scope.is_global()).then(|| params.scope.namespace()),
            selector: store_side,
            limit: params.effective_limit(),
            continue_token: params.skip_token.clone(),
        };
        let mut page = self.store.list(&query).await?;
        if !caller_side.is_empty() {
            page.items.retain(|obj| caller_side.matches(&obj.meta().labels));
        }
        Ok(page)
    }

    async fn create(&self, ctx: &Context, obj: T) -> Result<T> {
        ctx.check()?;
        self.store.create(obj).await
    }

    async fn update(&self, ctx: &Context, obj: T) -> Result<T> {
        ctx.check()?;
        self.store.update(obj).await
    }

    async fn update_status(&self, ctx: &Context, obj: T) -> Result<T> {
        ctx.check()?;
        self.store.update_status(obj).await
    }

    async fn delete(&self, ctx: &Context, obj: &T) -> Result<()> {
        ctx.check()?;
        self.store.delete(&obj.key()).await.map(|_| ())
    }

    async fn watch(&self, ctx: &Context, key: &ObjectKey) -> Result<Watch<T>> {
        ctx.check()?;
        let subscription = self.store.subscribe(key).await?;
        Ok(Watch::new(subscription, ctx.clone()))
    }
}
