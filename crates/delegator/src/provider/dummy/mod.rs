//! A provider that materializes `Storage` as `dummy.v1/Volume` objects in a
//! separate repository and simulates their provisioning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::context::Context;
use crate::delegated::{adapters, Delegated};
use crate::error::BoxError;
use crate::plugin::{DelegatedHandler, DelegatedPlugin, KindHandler, Plugin, PluginError, PluginResult};
use crate::repository::Repository;
use crate::resource::{AnyResource, ObjectKey, Spec, Storage, StorageSpec, WorkspaceSpec};

mod provisioner;
pub mod volume;

use provisioner::Provisioner;
pub use volume::{Volume, VolumeError, VolumeSpec, PROVISIONER_FINALIZER};

pub const PROVIDER_NAME: &str = "dummy";

#[derive(Debug, Clone, Default)]
pub struct DummyConfig {
    pub region: Option<String>,
    /// Simulated time the backend takes to settle a change.
    pub provision_delay: Duration,
    pub wait_timeout: Option<Duration>,
}

pub struct DummyProvider {
    plugin: DelegatedPlugin,
    volumes: Arc<dyn Repository<Volume>>,
    provision_delay: Duration,
    started: AtomicBool,
}

impl DummyProvider {
    pub fn new(volumes: Arc<dyn Repository<Volume>>, config: DummyConfig) -> Self {
        let mut plugin = DelegatedPlugin::new(PROVIDER_NAME)
            .handle(storage_handler(Arc::clone(&volumes), config.region))
            .handle(AcknowledgeWorkspace);
        if let Some(timeout) = config.wait_timeout {
            plugin = plugin.with_wait_timeout(timeout);
        }
        Self {
            plugin,
            volumes,
            provision_delay: config.provision_delay,
            started: AtomicBool::new(false),
        }
    }

    pub fn volumes(&self) -> &Arc<dyn Repository<Volume>> {
        &self.volumes
    }
}

fn storage_handler(
    volumes: Arc<dyn Repository<Volume>>,
    region: Option<String>,
) -> DelegatedHandler<StorageSpec, Storage, Volume> {
    let convert_region = region.clone();
    let reconcile = Delegated::new(
        adapters::bypass_resolve_source(),
        adapters::convert(move |storage: &Storage| {
            Ok(volume::to_volume(storage, PROVIDER_NAME, convert_region.as_deref()))
        }),
        adapters::load_existing(Arc::clone(&volumes)),
        adapters::mutate(move |target: &mut Volume, storage: &Storage| {
            volume::apply_storage(target, storage, PROVIDER_NAME, region.as_deref())
                .map_err(BoxError::from)
        }),
        adapters::propagate_apply(Arc::clone(&volumes)),
        adapters::condition(volume::is_ready),
        adapters::wait_with(Arc::clone(&volumes)),
    );

    let delete = Delegated::straight(
        adapters::convert(|storage: &Storage| Ok(volume::to_volume(storage, PROVIDER_NAME, None))),
        adapters::bypass_mutate(),
        adapters::propagate_delete(Arc::clone(&volumes)),
        adapters::condition(|target: &Volume| target.metadata.is_removed()),
        adapters::wait_removed(volumes),
    );

    DelegatedHandler::new(reconcile, delete).with_external_id(|target: &Volume| target.metadata.uid.clone())
}

/// Workspaces need nothing from this backend.
struct AcknowledgeWorkspace;

#[async_trait]
impl KindHandler for AcknowledgeWorkspace {
    fn kind(&self) -> &'static str {
        WorkspaceSpec::KIND
    }

    async fn reconcile(
        &self,
        _ctx: &Context,
        plugin: &str,
        obj: &mut AnyResource,
    ) -> Result<PluginResult, PluginError> {
        info!(plugin, key = %obj.key(), "Workspace acknowledged");
        Ok(PluginResult::succeeded("Acknowledged"))
    }

    async fn delete(&self, _ctx: &Context, _plugin: &str, _obj: &AnyResource) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Plugin for DummyProvider {
    fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Starts the simulated provisioner. It runs until `ctx` is done.
    async fn init(&self, ctx: &Context) -> Result<(), PluginError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let watch = self
            .volumes
            .watch(ctx, &ObjectKey::default())
            .await
            .map_err(|e| PluginError::Init {
                plugin: PROVIDER_NAME.to_string(),
                source: Box::new(e),
            })?;
        let provisioner = Provisioner::new(Arc::clone(&self.volumes), self.provision_delay);
        tokio::spawn(provisioner.run(ctx.clone(), watch));
        Ok(())
    }

    fn supported_kinds(&self) -> Vec<&'static str> {
        self.plugin.supported_kinds()
    }

    async fn reconcile(&self, ctx: &Context, obj: &mut AnyResource) -> Result<PluginResult, PluginError> {
        self.plugin.reconcile(ctx, obj).await
    }

    async fn delete(&self, ctx: &Context, obj: &AnyResource) -> Result<(), PluginError> {
        self.plugin.delete(ctx, obj).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegated::Stage;
    use crate::plugin::delegated::external_id_annotation;
    use crate::plugin::PluginState;
    use crate::repository::GenericRepository;
    use crate::resource::{Reference, Resource, Scope};
    use crate::store::{MemoryStore, ResourceStore};

    fn provider() -> DummyProvider {
        let store: Arc<dyn ResourceStore<Volume>> = Arc::new(MemoryStore::new());
        let volumes: Arc<dyn Repository<Volume>> = Arc::new(GenericRepository::new(store));
        DummyProvider::new(
            volumes,
            DummyConfig {
                region: Some("eu-1".into()),
                provision_delay: Duration::from_millis(5),
                wait_timeout: Some(Duration::from_secs(5)),
            },
        )
    }

    fn storage(size_gb: i64) -> AnyResource {
        AnyResource::Storage(
            Resource::new(
                "vol-1",
                StorageSpec {
                    size_gb,
                    sku_ref: Reference::urn("skus/rd500"),
                    source_image_ref: None,
                },
            )
            .with_scope(Scope::tenant("acme")),
        )
    }

    #[tokio::test]
    async fn test_storage_round_trip() {
        let ctx = Context::background();
        let provider = provider();
        provider.init(&ctx).await.unwrap();

        let mut obj = storage(100);
        let result = provider.reconcile(&ctx, &mut obj).await.unwrap();
        assert_eq!(result.state, PluginState::Succeeded);

        let volume = provider.volumes().load(&ctx, &obj.key()).await.unwrap();
        assert!(volume::is_ready(&volume));
        assert_eq!(volume.spec.size_gb, 100);
        assert_eq!(result.external_id, volume.metadata.uid);
        assert_eq!(
            obj.meta().annotations.get(&external_id_annotation(PROVIDER_NAME)),
            Some(&volume.metadata.uid)
        );

        let mut grown = storage(200);
        provider.reconcile(&ctx, &mut grown).await.unwrap();
        let volume = provider.volumes().load(&ctx, &obj.key()).await.unwrap();
        assert_eq!(volume.spec.size_gb, 200);
        assert_eq!(volume.metadata.generation, 2);

        provider.delete(&ctx, &obj).await.unwrap();
        let err = provider.volumes().load(&ctx, &obj.key()).await.unwrap_err();
        assert!(err.is_not_found());

        ctx.cancel();
    }

    #[tokio::test]
    async fn test_shrink_fails_in_mutate() {
        let ctx = Context::background();
        let provider = provider();
        provider.init(&ctx).await.unwrap();

        provider.reconcile(&ctx, &mut storage(100)).await.unwrap();
        let err = provider.reconcile(&ctx, &mut storage(10)).await.unwrap_err();
        match err {
            PluginError::Delegated(e) => {
                assert_eq!(e.stage, Stage::Mutate);
                assert!(e.downcast_ref::<VolumeError>().is_some());
            }
            other => panic!("unexpected error: {other}"),
        }

        ctx.cancel();
    }

    #[tokio::test]
    async fn test_delete_of_unprovisioned_storage_succeeds() {
        let ctx = Context::background();
        let provider = provider();
        provider.init(&ctx).await.unwrap();

        provider.delete(&ctx, &storage(100)).await.unwrap();
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_workspace_is_acknowledged() {
        let provider = provider();
        let mut ws = AnyResource::Workspace(Resource::new("dev", WorkspaceSpec::default()));
        let result = provider.reconcile(&Context::background(), &mut ws).await.unwrap();
        assert_eq!(result.state, PluginState::Succeeded);
        assert!(provider.supports(StorageSpec::KIND));
        assert!(provider.supports(WorkspaceSpec::KIND));
    }
}
