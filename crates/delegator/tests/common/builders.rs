//! Builders for test resources and plugins.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use delegator::plugin::{Plugin, PluginError, PluginResult};
use delegator::resource::{
    AnyResource, Reference, Resource, Scope, Spec, Storage, StorageSpec, Workspace, WorkspaceSpec,
};
use delegator::Context;

/// Builder for `Storage` resources.
pub struct StorageBuilder {
    name: String,
    scope: Scope,
    size_gb: i64,
    sku: String,
    labels: Vec<(String, String)>,
}

impl StorageBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: Scope::tenant("acme"),
            size_gb: 10,
            sku: "skus/rd500".to_string(),
            labels: Vec::new(),
        }
    }

    pub fn scope(mut self, tenant: &str, workspace: &str) -> Self {
        self.scope = Scope::new(tenant, workspace);
        self
    }

    pub fn size(mut self, size_gb: i64) -> Self {
        self.size_gb = size_gb;
        self
    }

    pub fn sku(mut self, sku: &str) -> Self {
        self.sku = sku.to_string();
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Storage {
        let spec = StorageSpec {
            size_gb: self.size_gb,
            sku_ref: Reference::urn(self.sku),
            source_image_ref: None,
        };
        self.labels.into_iter().fold(
            Resource::new(self.name, spec).with_scope(self.scope),
            |storage, (key, value)| storage.with_label(key, value),
        )
    }
}

pub fn workspace(tenant: &str, name: &str) -> Workspace {
    Resource::new(name, WorkspaceSpec::default()).with_scope(Scope::tenant(tenant))
}

/// A plugin with scripted outcomes that counts its calls.
pub struct StubPlugin {
    name: &'static str,
    outcome: Result<PluginResult, String>,
    delete_error: Mutex<Option<String>>,
    pub reconciles: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl StubPlugin {
    pub fn succeeding(name: &'static str) -> Self {
        Self::with_outcome(name, Ok(PluginResult::succeeded("ok")))
    }

    pub fn failing(name: &'static str, message: &str) -> Self {
        Self::with_outcome(name, Err(message.to_string()))
    }

    pub fn with_outcome(name: &'static str, outcome: Result<PluginResult, String>) -> Self {
        Self {
            name,
            outcome,
            delete_error: Mutex::new(None),
            reconciles: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn failing_delete(self, message: &str) -> Self {
        *self.delete_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Lets later deletes succeed.
    pub fn heal_delete(&self) {
        *self.delete_error.lock().unwrap() = None;
    }

    pub fn reconcile_count(&self) -> usize {
        self.reconciles.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for StubPlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self, _ctx: &Context) -> Result<(), PluginError> {
        Ok(())
    }

    fn supported_kinds(&self) -> Vec<&'static str> {
        vec![StorageSpec::KIND]
    }

    async fn reconcile(&self, _ctx: &Context, _obj: &mut AnyResource) -> Result<PluginResult, PluginError> {
        self.reconciles.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .map_err(|message| PluginError::Backend(message.into()))
    }

    async fn delete(&self, _ctx: &Context, _obj: &AnyResource) -> Result<(), PluginError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.delete_error.lock().unwrap().clone() {
            Some(message) => Err(PluginError::Backend(message.into())),
            None => Ok(()),
        }
    }
}
