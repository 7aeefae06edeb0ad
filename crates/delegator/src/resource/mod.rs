//! K8s-style resource model shared by the store, the repositories and the
//! reconcile loop.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod condition;
pub mod kinds;
pub mod labels;
pub mod meta;
pub mod reference;

pub use condition::{
    provider_condition_type, upsert_condition, ConditionState, ResourceStatus, StatusCondition,
    CONDITION_READY, CONDITION_VALIDATED,
};
pub use kinds::{Storage, StorageSpec, Workspace, WorkspaceSpec};
pub use meta::{Labels, ObjectKey, ObjectMeta, Scope};
pub use reference::{Reference, ReferenceObject};

/// A spec failed validation. Terminal until the owner edits the spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct ValidationError {
    pub reason: String,
    pub message: String,
}

impl ValidationError {
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self {
            reason: "InvalidSpec".to_string(),
            message: message.into(),
        }
    }
}

/// Anything the store can persist: identity, metadata and a separately
/// written status.
pub trait Object: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind identifier, e.g. `storage.v1/Storage`.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn status(&self) -> Option<&ResourceStatus>;
    fn set_status(&mut self, status: Option<ResourceStatus>);

    /// Whether the desired state of `self` equals that of `other`.
    fn same_spec(&self, other: &Self) -> bool;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Kind-specific desired state.
pub trait Spec: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;
    const API_VERSION: &'static str;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A spec that can be handed to plugins as an [`AnyResource`].
pub trait DomainSpec: Spec {
    fn into_any(resource: Resource<Self>) -> AnyResource;
    fn from_any(any: AnyResource) -> Option<Resource<Self>>;
}

/// A generic resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
}

impl<S: Spec> Resource<S> {
    pub fn new(name: impl Into<String>, spec: S) -> Self {
        Self {
            api_version: S::API_VERSION.to_string(),
            kind: S::KIND.to_string(),
            metadata: ObjectMeta::new(name),
            spec,
            status: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.metadata.scope = scope;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the status, creating an empty one if absent.
    pub fn status_mut(&mut self) -> &mut ResourceStatus {
        self.status.get_or_insert_with(ResourceStatus::default)
    }
}

impl<S: Spec> Object for Resource<S> {
    const KIND: &'static str = S::KIND;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<ResourceStatus>) {
        self.status = status;
    }

    fn same_spec(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

/// Closed set of domain resources handed to plugins.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyResource {
    Storage(Storage),
    Workspace(Workspace),
}

impl AnyResource {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyResource::Storage(_) => StorageSpec::KIND,
            AnyResource::Workspace(_) => WorkspaceSpec::KIND,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            AnyResource::Storage(r) => &r.metadata,
            AnyResource::Workspace(r) => &r.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            AnyResource::Storage(r) => &mut r.metadata,
            AnyResource::Workspace(r) => &mut r.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}
