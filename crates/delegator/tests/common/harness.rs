//! Test harness wiring stores, repositories, plugins and reconcilers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use delegator::controller::{Reconciler, ReconcilerConfig};
use delegator::plugin::{Plugin, PluginRegistry};
use delegator::provider::dummy::{DummyConfig, DummyProvider, Volume};
use delegator::repository::{GenericRepository, Repository};
use delegator::resource::{Object, ObjectKey, Storage, StorageSpec, Workspace, WorkspaceSpec};
use delegator::store::sqlite::Database;
use delegator::store::{MemoryStore, ResourceStore, SqliteStore};
use delegator::Context;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the harness keeps its objects.
pub enum Backend {
    Memory,
    Sqlite(Database),
}

impl Backend {
    fn repository<T: Object>(&self) -> Arc<dyn Repository<T>> {
        let store: Arc<dyn ResourceStore<T>> = match self {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Sqlite(db) => Arc::new(
                SqliteStore::new(db.clone(), Duration::from_millis(20))
                    .expect("Failed to open SQLite store"),
            ),
        };
        Arc::new(GenericRepository::new(store))
    }
}

/// Isolated engine instance. Background tasks stop when the harness drops.
pub struct TestHarness {
    pub ctx: Context,
    pub storages: Arc<dyn Repository<Storage>>,
    pub workspaces: Arc<dyn Repository<Workspace>>,
    pub volumes: Arc<dyn Repository<Volume>>,
    pub plugins: Arc<PluginRegistry>,
}

impl TestHarness {
    /// In-memory stores with the dummy provider registered.
    pub async fn new() -> Self {
        Self::build(Backend::Memory, true, Vec::new()).await
    }

    /// SQLite-backed stores with the dummy provider registered.
    pub async fn sqlite() -> Self {
        let db = Database::open_in_memory().expect("Failed to open database");
        Self::build(Backend::Sqlite(db), true, Vec::new()).await
    }

    /// In-memory stores with only the given plugins registered.
    pub async fn with_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self::build(Backend::Memory, false, plugins).await
    }

    async fn build(backend: Backend, dummy: bool, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let ctx = Context::background();
        let storages = backend.repository::<Storage>();
        let workspaces = backend.repository::<Workspace>();
        let volumes = backend.repository::<Volume>();

        let mut registry = PluginRegistry::new();
        if dummy {
            let config = DummyConfig {
                region: Some("eu-1".to_string()),
                provision_delay: Duration::from_millis(5),
                wait_timeout: Some(WAIT_TIMEOUT),
            };
            registry
                .register(Arc::new(DummyProvider::new(Arc::clone(&volumes), config)))
                .expect("Failed to register dummy provider");
        }
        for plugin in plugins {
            registry.register(plugin).expect("Failed to register plugin");
        }
        registry.init_all(&ctx).await.expect("Failed to init plugins");

        Self {
            ctx,
            storages,
            workspaces,
            volumes,
            plugins: Arc::new(registry),
        }
    }

    pub fn storage_reconciler(&self) -> Reconciler<StorageSpec> {
        self.storage_reconciler_with(ReconcilerConfig::default())
    }

    pub fn storage_reconciler_with(&self, config: ReconcilerConfig) -> Reconciler<StorageSpec> {
        Reconciler::new(Arc::clone(&self.storages), Arc::clone(&self.plugins), config)
    }

    pub fn workspace_reconciler(&self) -> Reconciler<WorkspaceSpec> {
        Reconciler::new(
            Arc::clone(&self.workspaces),
            Arc::clone(&self.plugins),
            ReconcilerConfig::default(),
        )
    }

    /// Blocks until a revision of `seed` satisfies `condition`.
    pub async fn wait_for_storage<F>(&self, seed: &Storage, condition: F) -> Storage
    where
        F: Fn(&Storage) -> bool + Send + Sync + 'static,
    {
        let ctx = self.ctx.with_timeout(WAIT_TIMEOUT);
        self.storages
            .wait_until(&ctx, seed, &condition)
            .await
            .expect("Storage never reached the expected state")
    }

    /// Polls until `key` is gone from `repo`.
    pub async fn wait_gone<T: Object>(&self, repo: &Arc<dyn Repository<T>>, key: &ObjectKey) {
        let gone = async {
            loop {
                match repo.load(&self.ctx, key).await {
                    Err(e) if e.is_not_found() => return,
                    Err(e) => panic!("Unexpected error while waiting for removal: {e}"),
                    Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, gone)
            .await
            .expect("Object was never removed");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}
