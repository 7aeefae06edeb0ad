use thiserror::Error;

use crate::plugin::PluginError;
use crate::repository::RepositoryError;

/// Failures that end a reconcile pass and hand the key back to the queue for
/// backoff. Provider reconcile errors are recorded as conditions instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("Provider '{provider}' failed to delete: {source}")]
    ProviderDelete {
        provider: String,
        #[source]
        source: PluginError,
    },

    #[error("Expected a {expected} back from the plugins, got a {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
