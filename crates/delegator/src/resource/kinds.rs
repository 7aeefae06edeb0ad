//! Domain resource kinds handled by the engine.

use serde::{Deserialize, Serialize};

use super::reference::Reference;
use super::{AnyResource, DomainSpec, Resource, Spec, ValidationError};

// ============================================================================
// Storage
// ============================================================================

/// Block storage requested by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(rename = "sizeGB")]
    pub size_gb: i64,
    pub sku_ref: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_ref: Option<Reference>,
}

impl Spec for StorageSpec {
    const KIND: &'static str = "storage.v1/Storage";
    const API_VERSION: &'static str = "storage.v1";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.size_gb <= 0 {
            return Err(ValidationError::invalid_spec("sizeGB must be > 0"));
        }
        Ok(())
    }
}

impl DomainSpec for StorageSpec {
    fn into_any(resource: Resource<Self>) -> AnyResource {
        AnyResource::Storage(resource)
    }

    fn from_any(any: AnyResource) -> Option<Resource<Self>> {
        match any {
            AnyResource::Storage(resource) => Some(resource),
            _ => None,
        }
    }
}

pub type Storage = Resource<StorageSpec>;

// ============================================================================
// Workspace
// ============================================================================

/// A tenant workspace. Carries no provisioning parameters of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Spec for WorkspaceSpec {
    const KIND: &'static str = "workspace.v1/Workspace";
    const API_VERSION: &'static str = "workspace.v1";
}

impl DomainSpec for WorkspaceSpec {
    fn into_any(resource: Resource<Self>) -> AnyResource {
        AnyResource::Workspace(resource)
    }

    fn from_any(any: AnyResource) -> Option<Resource<Self>> {
        match any {
            AnyResource::Workspace(resource) => Some(resource),
            _ => None,
        }
    }
}

pub type Workspace = Resource<WorkspaceSpec>;
