use thiserror::Error;

use crate::delegated::DelegatedError;
use crate::error::BoxError;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error(transparent)]
    Delegated(#[from] DelegatedError),

    #[error("Plugin '{plugin}' does not handle kind '{kind}'")]
    UnsupportedKind { plugin: String, kind: String },

    #[error("Plugin '{plugin}' failed to initialize: {source}")]
    Init {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),
}

/// The plugin set is fixed at startup; a clash is a configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin '{0}' is already registered")]
    Duplicate(String),
}
