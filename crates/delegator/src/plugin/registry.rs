use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{Plugin, PluginError, RegistryError};
use crate::context::Context;

/// Plugins by name. Built once at startup and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        info!(plugin = %name, kinds = ?plugin.supported_kinds(), "Registered plugin");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins handling `kind`, in name order.
    pub fn for_kind(&self, kind: &str) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .values()
            .filter(|p| p.supports(kind))
            .cloned()
            .collect()
    }

    /// Initializes every plugin in name order, stopping at the first failure.
    pub async fn init_all(&self, ctx: &Context) -> Result<(), PluginError> {
        for (name, plugin) in &self.plugins {
            plugin.init(ctx).await?;
            info!(plugin = %name, "Plugin initialized");
        }
        Ok(())
    }
}
