pub mod config;
pub mod context;
pub mod controller;
pub mod delegated;
pub mod engine;
pub mod error;
pub mod pagination;
pub mod plugin;
pub mod provider;
pub mod repository;
pub mod resource;
pub mod selector;
pub mod store;

pub use config::{load_config, DelegatorConfig};
pub use context::{Context, ContextError};
pub use controller::{Controller, ReconcileResult, Reconciler, ReconcilerConfig};
pub use delegated::{Delegated, Stage};
pub use engine::Engine;
pub use error::{BoxError, ConfigError, DelegatorError, Result};
pub use pagination::{ListParams, Page, Paginator, SkipToken};
pub use plugin::{Plugin, PluginRegistry, PluginResult, PluginState};
pub use repository::{GenericRepository, Repository, RepositoryError};
pub use resource::{AnyResource, ObjectKey, ObjectMeta, Resource, Scope};
pub use selector::Selector;
