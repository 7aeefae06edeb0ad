//! Plugins assembled from delegated pipelines, one handler per kind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info_span, Instrument};

use super::{Plugin, PluginError, PluginResult};
use crate::context::Context;
use crate::delegated::Delegated;
use crate::resource::{AnyResource, DomainSpec, Resource};

pub const ANNOTATION_PREFIX: &str = "delegator.secapi.cloud/";

/// Annotation key under which `plugin` records the backend id it assigned.
pub fn external_id_annotation(plugin: &str) -> String {
    format!("{}{}.external-id", ANNOTATION_PREFIX, plugin)
}

/// Extracts the backend id from a propagated target. Empty means none.
pub type ExternalIdFn<AB> = Arc<dyn Fn(&AB) -> String + Send + Sync>;

/// Reconcile and delete for one kind inside a [`DelegatedPlugin`].
#[async_trait]
pub trait KindHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn reconcile(
        &self,
        ctx: &Context,
        plugin: &str,
        obj: &mut AnyResource,
    ) -> Result<PluginResult, PluginError>;

    async fn delete(&self, ctx: &Context, plugin: &str, obj: &AnyResource) -> Result<(), PluginError>;
}

/// A [`KindHandler`] backed by a reconcile pipeline and a delete pipeline.
pub struct DelegatedHandler<S, SB, AB> {
    reconcile: Delegated<Resource<S>, SB, AB>,
    delete: Delegated<Resource<S>, Resource<S>, AB>,
    external_id: Option<ExternalIdFn<AB>>,
}

impl<S, SB, AB> DelegatedHandler<S, SB, AB>
where
    S: DomainSpec,
    SB: Send + Sync + 'static,
    AB: Send + Sync + 'static,
{
    pub fn new(
        reconcile: Delegated<Resource<S>, SB, AB>,
        delete: Delegated<Resource<S>, Resource<S>, AB>,
    ) -> Self {
        Self {
            reconcile,
            delete,
            external_id: None,
        }
    }

    pub fn with_external_id<F>(mut self, extract: F) -> Self
    where
        F: Fn(&AB) -> String + Send + Sync + 'static,
    {
        self.external_id = Some(Arc::new(extract));
        self
    }

    fn unwrap_any(plugin: &str, obj: &AnyResource) -> Result<Resource<S>, PluginError> {
        S::from_any(obj.clone()).ok_or_else(|| PluginError::UnsupportedKind {
            plugin: plugin.to_string(),
            kind: obj.kind().to_string(),
        })
    }
}

#[async_trait]
impl<S, SB, AB> KindHandler for DelegatedHandler<S, SB, AB>
where
    S: DomainSpec,
    SB: Send + Sync + 'static,
    AB: Send + Sync + 'static,
{
    fn kind(&self) -> &'static str {
        S::KIND
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        plugin: &str,
        obj: &mut AnyResource,
    ) -> Result<PluginResult, PluginError> {
        let resource = Self::unwrap_any(plugin, obj)?;
        let target = self.reconcile.perform(ctx, resource).await?;

        let mut result = PluginResult::succeeded("Reconciled");
        if let Some(extract) = &self.external_id {
            let id = extract(&target);
            if !id.is_empty() {
                obj.meta_mut()
                    .annotations
                    .insert(external_id_annotation(plugin), id.clone());
                result = result.with_external_id(id);
            }
        }
        Ok(result)
    }

    async fn delete(&self, ctx: &Context, plugin: &str, obj: &AnyResource) -> Result<(), PluginError> {
        let resource = Self::unwrap_any(plugin, obj)?;
        self.delete.perform(ctx, resource).await?;
        Ok(())
    }
}

/// A plugin whose behavior is fully described by its kind handlers.
pub struct DelegatedPlugin {
    name: String,
    handlers: BTreeMap<&'static str, Arc<dyn KindHandler>>,
    wait_timeout: Option<Duration>,
}

impl DelegatedPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: BTreeMap::new(),
            wait_timeout: None,
        }
    }

    /// Bounds every reconcile and delete call, including its wait stage.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn handle<H: KindHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    fn handler(&self, kind: &str) -> Result<&Arc<dyn KindHandler>, PluginError> {
        self.handlers
            .get(kind)
            .ok_or_else(|| PluginError::UnsupportedKind {
                plugin: self.name.clone(),
                kind: kind.to_string(),
            })
    }

    fn bounded(&self, ctx: &Context) -> Context {
        match self.wait_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        }
    }
}

#[async_trait]
impl Plugin for DelegatedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _ctx: &Context) -> Result<(), PluginError> {
        Ok(())
    }

    fn supported_kinds(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    async fn reconcile(&self, ctx: &Context, obj: &mut AnyResource) -> Result<PluginResult, PluginError> {
        let handler = self.handler(obj.kind())?;
        let span = info_span!("plugin_reconcile", plugin = %self.name, key = %obj.key());
        let ctx = self.bounded(ctx);
        let result = handler.reconcile(&ctx, &self.name, obj).instrument(span).await;
        ctx.cancel();
        if let Ok(result) = &result {
            debug!(plugin = %self.name, state = %result.state, "Plugin reconcile finished");
        }
        result
    }

    async fn delete(&self, ctx: &Context, obj: &AnyResource) -> Result<(), PluginError> {
        let handler = self.handler(obj.kind())?;
        let span = info_span!("plugin_delete", plugin = %self.name, key = %obj.key());
        let ctx = self.bounded(ctx);
        let result = handler.delete(&ctx, &self.name, obj).instrument(span).await;
        ctx.cancel();
        result
    }
}
