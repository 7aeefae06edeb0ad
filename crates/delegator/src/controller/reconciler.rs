//! One reconcile pass over a domain resource.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn, Instrument};

use super::ReconcileError;
use crate::context::Context;
use crate::plugin::PluginRegistry;
use crate::repository::{Repository, RepositoryError};
use crate::resource::{
    provider_condition_type, ConditionState, DomainSpec, ObjectKey, Resource, ResourceStatus,
    StatusCondition, CONDITION_READY, CONDITION_VALIDATED,
};

pub const DEFAULT_FINALIZER: &str = "delegator.secapi.cloud/finalizer";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Marker that keeps a resource in the store until providers cleaned up.
    pub finalizer: String,
    /// Lower bound for every requeue.
    pub requeue_floor: Duration,
    /// Condition state for plugin states this build does not know.
    pub unknown_state: ConditionState,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
            requeue_floor: Duration::from_secs(2),
            unknown_state: ConditionState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

pub struct Reconciler<S: DomainSpec> {
    repo: Arc<dyn Repository<Resource<S>>>,
    plugins: Arc<PluginRegistry>,
    config: ReconcilerConfig,
}

impl<S: DomainSpec> Reconciler<S> {
    pub fn new(
        repo: Arc<dyn Repository<Resource<S>>>,
        plugins: Arc<PluginRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            repo,
            plugins,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository<Resource<S>>> {
        &self.repo
    }

    pub async fn reconcile(&self, ctx: &Context, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        let span = info_span!("reconcile", kind = S::KIND, key = %key);
        self.run(ctx, key).instrument(span).await
    }

    async fn run(&self, ctx: &Context, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        let mut obj = match self.repo.load(ctx, key).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!("Object is gone, nothing to do");
                return Ok(ReconcileResult::done());
            }
            Err(e) => return Err(e.into()),
        };

        if obj.metadata.is_terminating() {
            return self.finalize(ctx, obj).await;
        }

        if obj.metadata.add_finalizer(&self.config.finalizer) {
            // The write is observed by the watch and re-enters here.
            self.repo.update(ctx, obj).await?;
            debug!("Finalizer added");
            return Ok(ReconcileResult::done());
        }

        self.sync(ctx, obj).await
    }

    async fn sync(&self, ctx: &Context, obj: Resource<S>) -> Result<ReconcileResult, ReconcileError> {
        let previous = obj.status.clone();
        let mut status = previous.clone().unwrap_or_default();
        status.observed_generation = obj.metadata.generation;

        if let Err(e) = obj.spec.validate() {
            info!(reason = %e.reason, "Validation failed: {}", e.message);
            status.state = ConditionState::Error;
            status.set_condition(StatusCondition::new(
                CONDITION_VALIDATED,
                ConditionState::Error,
                e.reason.clone(),
                e.message.clone(),
            ));
            // Providers are not consulted for an invalid spec, so an earlier
            // Ready=Active no longer holds.
            status.set_condition(StatusCondition::new(
                CONDITION_READY,
                ConditionState::Error,
                e.reason,
                e.message,
            ));
            self.write_status(ctx, obj, previous.as_ref(), status).await?;
            return Ok(ReconcileResult::done());
        }
        status.set_condition(StatusCondition::new(
            CONDITION_VALIDATED,
            ConditionState::Active,
            "OK",
            "Spec is valid",
        ));

        let mut any = S::into_any(obj.clone());
        let mut all_active = true;
        let mut requested: Option<Duration> = None;
        for plugin in self.plugins.for_kind(S::KIND) {
            let condition_type = provider_condition_type(plugin.name());
            let condition = match plugin.reconcile(ctx, &mut any).await {
                Ok(result) => {
                    if let Some(after) = result.requeue_after {
                        requested = Some(requested.map_or(after, |r| r.max(after)));
                    }
                    let state = result.state.condition_state(self.config.unknown_state);
                    StatusCondition::new(condition_type, state, result.state.to_string(), result.message)
                }
                Err(e) => {
                    warn!(plugin = plugin.name(), error = %e, "Provider reconcile failed");
                    StatusCondition::new(condition_type, ConditionState::Error, "Error", e.to_string())
                }
            };
            all_active &= condition.state == ConditionState::Active;
            status.set_condition(condition);
        }

        let ready = if all_active {
            StatusCondition::new(
                CONDITION_READY,
                ConditionState::Active,
                "AllProvidersSucceeded",
                "All providers are ready",
            )
        } else {
            StatusCondition::new(
                CONDITION_READY,
                ConditionState::Pending,
                "InProgress",
                "Waiting for providers",
            )
        };
        status.state = ready.state;
        status.set_condition(ready);

        let found = any.kind();
        let annotated = S::from_any(any).ok_or(ReconcileError::KindMismatch {
            expected: S::KIND,
            found,
        })?;
        let mut obj = obj;
        if annotated.metadata.annotations != obj.metadata.annotations {
            obj.metadata.annotations = annotated.metadata.annotations;
            obj = self.repo.update(ctx, obj).await?;
        }
        self.write_status(ctx, obj, previous.as_ref(), status).await?;

        if all_active && requested.is_none() {
            debug!("All providers ready");
            return Ok(ReconcileResult::done());
        }
        let after = requested.unwrap_or_default().max(self.config.requeue_floor);
        debug!(after_ms = after.as_millis() as u64, "Requeueing");
        Ok(ReconcileResult::requeue(after))
    }

    async fn finalize(&self, ctx: &Context, obj: Resource<S>) -> Result<ReconcileResult, ReconcileError> {
        if !obj.metadata.has_finalizer(&self.config.finalizer) {
            return Ok(ReconcileResult::done());
        }

        let previous = obj.status.clone();
        let mut status = previous.clone().unwrap_or_default();
        let any = S::into_any(obj.clone());
        for plugin in self.plugins.for_kind(S::KIND) {
            let condition_type = provider_condition_type(plugin.name());
            if let Err(e) = plugin.delete(ctx, &any).await {
                warn!(plugin = plugin.name(), error = %e, "Provider delete failed");
                status.set_condition(StatusCondition::new(
                    condition_type,
                    ConditionState::Error,
                    "DeleteFailed",
                    e.to_string(),
                ));
                if let Err(write_err) = self.write_status(ctx, obj, previous.as_ref(), status).await {
                    warn!(error = %write_err, "Could not record delete failure");
                }
                return Err(ReconcileError::ProviderDelete {
                    provider: plugin.name().to_string(),
                    source: e,
                });
            }
            status.set_condition(StatusCondition::new(
                condition_type,
                ConditionState::Deleting,
                "Deleted",
                "Provider resources removed",
            ));
        }
        status.state = ConditionState::Deleting;

        let mut obj = self.write_status(ctx, obj, previous.as_ref(), status).await?;
        obj.metadata.remove_finalizer(&self.config.finalizer);
        self.repo.update(ctx, obj).await?;
        info!("Cleanup finished, finalizer removed");
        Ok(ReconcileResult::done())
    }

    /// Persists `status` unless it equals what is stored, so that a settled
    /// resource does not generate further change events.
    async fn write_status(
        &self,
        ctx: &Context,
        mut obj: Resource<S>,
        previous: Option<&ResourceStatus>,
        status: ResourceStatus,
    ) -> Result<Resource<S>, RepositoryError> {
        if previous == Some(&status) {
            return Ok(obj);
        }
        obj.status = Some(status);
        self.repo.update_status(ctx, obj).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::plugin::{Plugin, PluginError, PluginResult, PluginState};
    use crate::repository::GenericRepository;
    use crate::resource::{AnyResource, Object, Reference, Scope, Spec, Storage, StorageSpec};
    use crate::store::{MemoryStore, ResourceStore};

    struct Stub {
        name: &'static str,
        outcome: Result<PluginResult, &'static str>,
    }

    #[async_trait]
    impl Plugin for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn init(&self, _ctx: &Context) -> Result<(), PluginError> {
            Ok(())
        }

        fn supported_kinds(&self) -> Vec<&'static str> {
            vec![StorageSpec::KIND]
        }

        async fn reconcile(&self, _ctx: &Context, obj: &mut AnyResource) -> Result<PluginResult, PluginError> {
            obj.meta_mut()
                .annotations
                .insert(format!("{}/seen", self.name), "true".into());
            self.outcome
                .clone()
                .map_err(|msg| PluginError::Backend(msg.into()))
        }

        async fn delete(&self, _ctx: &Context, _obj: &AnyResource) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn reconciler(plugins: Vec<Stub>) -> Reconciler<StorageSpec> {
        let store: Arc<dyn ResourceStore<Storage>> = Arc::new(MemoryStore::new());
        let repo: Arc<dyn Repository<Storage>> = Arc::new(GenericRepository::new(store));
        let mut registry = PluginRegistry::new();
        for plugin in plugins {
            registry.register(Arc::new(plugin)).unwrap();
        }
        Reconciler::new(repo, Arc::new(registry), ReconcilerConfig::default())
    }

    fn storage(size_gb: i64) -> Storage {
        Resource::new(
            "vol-1",
            StorageSpec {
                size_gb,
                sku_ref: Reference::urn("skus/rd500"),
                source_image_ref: None,
            },
        )
        .with_scope(Scope::tenant("acme"))
    }

    fn condition_state(obj: &Storage, condition_type: &str) -> Option<ConditionState> {
        obj.status
            .as_ref()
            .and_then(|s| s.condition(condition_type))
            .map(|c| c.state)
    }

    #[tokio::test]
    async fn test_provider_isolation() {
        let reconciler = reconciler(vec![
            Stub {
                name: "a",
                outcome: Err("backend down"),
            },
            Stub {
                name: "b",
                outcome: Ok(PluginResult::succeeded("ok")),
            },
        ]);
        let ctx = Context::background();
        let key = reconciler.repository().create(&ctx, storage(10)).await.unwrap().key();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        let result = reconciler.reconcile(&ctx, &key).await.unwrap();
        assert_eq!(result, ReconcileResult::requeue(Duration::from_secs(2)));

        let obj = reconciler.repository().load(&ctx, &key).await.unwrap();
        assert_eq!(condition_state(&obj, "Provider:a"), Some(ConditionState::Error));
        assert_eq!(condition_state(&obj, "Provider:b"), Some(ConditionState::Active));
        assert_eq!(condition_state(&obj, CONDITION_READY), Some(ConditionState::Pending));
        assert_eq!(
            obj.status.as_ref().and_then(|s| s.condition("Provider:a")).map(|c| c.message.as_str()),
            Some("Backend error: backend down")
        );
        // Annotations from both plugins were persisted.
        assert!(obj.metadata.annotations.contains_key("a/seen"));
        assert!(obj.metadata.annotations.contains_key("b/seen"));
    }

    #[tokio::test]
    async fn test_validation_error_is_terminal() {
        let reconciler = reconciler(vec![Stub {
            name: "a",
            outcome: Ok(PluginResult::succeeded("ok")),
        }]);
        let ctx = Context::background();
        let key = reconciler.repository().create(&ctx, storage(0)).await.unwrap().key();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        let result = reconciler.reconcile(&ctx, &key).await.unwrap();
        assert_eq!(result, ReconcileResult::done());

        let obj = reconciler.repository().load(&ctx, &key).await.unwrap();
        let validated = obj.status.as_ref().and_then(|s| s.condition(CONDITION_VALIDATED)).unwrap();
        assert_eq!(validated.state, ConditionState::Error);
        assert_eq!(validated.reason, "InvalidSpec");
        assert_eq!(validated.message, "sizeGB must be > 0");
        assert_eq!(condition_state(&obj, "Provider:a"), None);
    }

    #[tokio::test]
    async fn test_requeue_respects_floor_and_requests() {
        let reconciler = reconciler(vec![
            Stub {
                name: "slow",
                outcome: Ok(PluginResult::in_progress("creating").requeue_after(Duration::from_secs(30))),
            },
            Stub {
                name: "eager",
                outcome: Ok(PluginResult::succeeded("ok").requeue_after(Duration::from_millis(10))),
            },
        ]);
        let ctx = Context::background();
        let key = reconciler.repository().create(&ctx, storage(10)).await.unwrap().key();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        let result = reconciler.reconcile(&ctx, &key).await.unwrap();
        assert_eq!(result.requeue_after, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_ready_without_requeue() {
        let reconciler = reconciler(vec![Stub {
            name: "a",
            outcome: Ok(PluginResult::new(PluginState::Succeeded, "done").with_external_id("ext-1")),
        }]);
        let ctx = Context::background();
        let key = reconciler.repository().create(&ctx, storage(10)).await.unwrap().key();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        let result = reconciler.reconcile(&ctx, &key).await.unwrap();
        assert_eq!(result, ReconcileResult::done());

        let obj = reconciler.repository().load(&ctx, &key).await.unwrap();
        let status = obj.status.unwrap();
        assert_eq!(status.state, ConditionState::Active);
        assert_eq!(status.observed_generation, obj.metadata.generation);
        assert_eq!(status.condition(CONDITION_READY).unwrap().reason, "AllProvidersSucceeded");
    }

    #[tokio::test]
    async fn test_settled_resource_is_not_rewritten() {
        let reconciler = reconciler(vec![Stub {
            name: "a",
            outcome: Ok(PluginResult::succeeded("ok")),
        }]);
        let ctx = Context::background();
        let key = reconciler.repository().create(&ctx, storage(10)).await.unwrap().key();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        reconciler.reconcile(&ctx, &key).await.unwrap();
        let settled = reconciler.repository().load(&ctx, &key).await.unwrap();

        reconciler.reconcile(&ctx, &key).await.unwrap();
        let again = reconciler.repository().load(&ctx, &key).await.unwrap();
        assert_eq!(again.metadata.resource_version, settled.metadata.resource_version);
    }
}
