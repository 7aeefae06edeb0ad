//! Process-level wiring: stores, plugin registry and one controller per
//! domain kind.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::config::DelegatorConfig;
use crate::context::Context;
use crate::controller::{Controller, Reconciler};
use crate::error::Result;
use crate::plugin::PluginRegistry;
use crate::provider::dummy::{DummyProvider, Volume};
use crate::repository::{GenericRepository, Repository};
use crate::resource::{DomainSpec, Object, Resource, Storage, StorageSpec, Workspace, WorkspaceSpec};
use crate::store::sqlite::Database;
use crate::store::{MemoryStore, ResourceStore, SqliteStore};

/// Opens one store per kind, all backed by the same database when one is
/// configured.
struct Stores {
    db: Option<Database>,
    poll_interval: Duration,
}

impl Stores {
    fn open(config: &DelegatorConfig) -> Result<Self> {
        let db = match &config.database {
            Some(path) => Some(Database::open(path)?),
            None => {
                info!("No database configured, state is kept in memory");
                None
            }
        };
        Ok(Self {
            db,
            poll_interval: config.watch_poll_interval(),
        })
    }

    fn repository<T: Object>(&self) -> Result<Arc<dyn Repository<T>>> {
        let store: Arc<dyn ResourceStore<T>> = match &self.db {
            Some(db) => Arc::new(SqliteStore::new(db.clone(), self.poll_interval)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Arc::new(GenericRepository::new(store)))
    }
}

/// A running engine. Dropping it does not stop the controllers; call
/// [`Engine::shutdown`].
pub struct Engine {
    ctx: Context,
    storages: Arc<dyn Repository<Storage>>,
    workspaces: Arc<dyn Repository<Workspace>>,
    controllers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Opens the stores, initializes the plugins and starts the controllers.
    /// Everything runs until `ctx` is cancelled.
    pub async fn start(config: &DelegatorConfig, ctx: Context) -> Result<Self> {
        let stores = Stores::open(config)?;

        let volumes = stores.repository::<Volume>()?;
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(DummyProvider::new(volumes, config.dummy_config())))?;
        registry.init_all(&ctx).await?;
        let plugins = Arc::new(registry);

        let storages = stores.repository::<Storage>()?;
        let workspaces = stores.repository::<Workspace>()?;
        let controllers = vec![
            spawn_controller::<StorageSpec>(&ctx, Arc::clone(&storages), &plugins, config),
            spawn_controller::<WorkspaceSpec>(&ctx, Arc::clone(&workspaces), &plugins, config),
        ];
        info!("Engine started with {} plugin(s)", plugins.len());

        Ok(Self {
            ctx,
            storages,
            workspaces,
            controllers,
        })
    }

    pub fn storages(&self) -> &Arc<dyn Repository<Storage>> {
        &self.storages
    }

    pub fn workspaces(&self) -> &Arc<dyn Repository<Workspace>> {
        &self.workspaces
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Cancels the engine context and waits for every controller to stop.
    pub async fn shutdown(self) {
        self.ctx.cancel();
        for handle in self.controllers {
            if let Err(e) = handle.await {
                error!("Controller task failed: {}", e);
            }
        }
        info!("Engine stopped");
    }
}

fn spawn_controller<S: DomainSpec>(
    ctx: &Context,
    repo: Arc<dyn Repository<Resource<S>>>,
    plugins: &Arc<PluginRegistry>,
    config: &DelegatorConfig,
) -> JoinHandle<()> {
    let reconciler = Reconciler::new(repo, Arc::clone(plugins), config.reconciler_config());
    let controller = Controller::new(reconciler, config.controller_config());
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.run(ctx).await {
            error!("Controller for {} stopped with error: {}", S::KIND, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ConditionState, Reference, Scope, CONDITION_READY};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_reconciles_storage() {
        let config = DelegatorConfig::default();
        let engine = Engine::start(&config, Context::background()).await.unwrap();
        let ctx = engine.context().with_timeout(Duration::from_secs(5));

        let storage = Resource::new(
            "vol-1",
            StorageSpec {
                size_gb: 10,
                sku_ref: Reference::urn("skus/rd500"),
                source_image_ref: None,
            },
        )
        .with_scope(Scope::tenant("acme"));
        let created = engine.storages().create(&ctx, storage).await.unwrap();

        let ready = engine
            .storages()
            .wait_until(&ctx, &created, &|s: &Storage| {
                s.status
                    .as_ref()
                    .and_then(|st| st.condition(CONDITION_READY))
                    .is_some_and(|c| c.state == ConditionState::Active)
            })
            .await
            .unwrap();
        assert!(ready.metadata.has_finalizer(&config.finalizer));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_engine_reports_unopenable_database() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let config = DelegatorConfig {
            database: Some(blocker.join("state.db")),
            ..DelegatorConfig::default()
        };

        let err = Engine::start(&config, Context::background()).await.err().unwrap();
        assert!(matches!(err, crate::error::DelegatorError::Database(_)));
    }
}
