//! Provider plugins: named units that realize domain resources in one
//! backend.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::resource::{AnyResource, ConditionState};

pub mod delegated;
pub mod error;
pub mod registry;

pub use delegated::{DelegatedHandler, DelegatedPlugin, KindHandler};
pub use error::{PluginError, RegistryError};
pub use registry::PluginRegistry;

/// Outcome of one plugin reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Any state this build does not know about.
    #[serde(other)]
    Unknown,
}

impl PluginState {
    /// Condition state for this result. `unknown` is used for states this
    /// build does not recognize.
    pub fn condition_state(self, unknown: ConditionState) -> ConditionState {
        match self {
            PluginState::Pending | PluginState::InProgress => ConditionState::Pending,
            PluginState::Succeeded => ConditionState::Active,
            PluginState::Failed => ConditionState::Error,
            PluginState::Unknown => unknown,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Pending => write!(f, "Pending"),
            PluginState::InProgress => write!(f, "InProgress"),
            PluginState::Succeeded => write!(f, "Succeeded"),
            PluginState::Failed => write!(f, "Failed"),
            PluginState::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginResult {
    pub state: PluginState,
    pub message: String,
    pub external_id: String,
    pub requeue_after: Option<Duration>,
}

impl PluginResult {
    pub fn new(state: PluginState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::new(PluginState::Succeeded, message)
    }

    pub fn in_progress(message: impl Into<String>) -> Self {
        Self::new(PluginState::InProgress, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(PluginState::Failed, message)
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }
}

/// A provider backend integration.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at startup, before any reconcile.
    async fn init(&self, ctx: &Context) -> Result<(), PluginError>;

    /// Kind identifiers this plugin handles, e.g. `storage.v1/Storage`.
    fn supported_kinds(&self) -> Vec<&'static str>;

    fn supports(&self, kind: &str) -> bool {
        self.supported_kinds().iter().any(|k| *k == kind)
    }

    /// Drives the backend towards the resource's desired state. May record
    /// annotations on `obj`.
    async fn reconcile(&self, ctx: &Context, obj: &mut AnyResource) -> Result<PluginResult, PluginError>;

    /// Removes everything the plugin created for `obj`.
    async fn delete(&self, ctx: &Context, obj: &AnyResource) -> Result<(), PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        let unknown = ConditionState::Pending;
        assert_eq!(PluginState::Pending.condition_state(unknown), ConditionState::Pending);
        assert_eq!(PluginState::InProgress.condition_state(unknown), ConditionState::Pending);
        assert_eq!(PluginState::Succeeded.condition_state(unknown), ConditionState::Active);
        assert_eq!(PluginState::Failed.condition_state(unknown), ConditionState::Error);
        assert_eq!(
            PluginState::Unknown.condition_state(ConditionState::Error),
            ConditionState::Error
        );
    }

    #[test]
    fn test_unrecognized_state_decodes_as_unknown() {
        let state: PluginState = serde_json::from_str(r#""Hibernating""#).unwrap();
        assert_eq!(state, PluginState::Unknown);
    }
}
