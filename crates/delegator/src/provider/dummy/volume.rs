//! Provider-side volume and its mapping from `Storage`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::labels::{internal_labels, user_labels};
use crate::resource::{ConditionState, Labels, Resource, Spec, Storage};

pub const PROVISIONER_FINALIZER: &str = "dummy.v1/provisioner";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    #[serde(rename = "sizeGB")]
    pub size_gb: i64,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    /// Key of the `Storage` this volume realizes.
    pub storage_ref: String,
}

impl Spec for VolumeSpec {
    const KIND: &'static str = "dummy.v1/Volume";
    const API_VERSION: &'static str = "dummy.v1";
}

pub type Volume = Resource<VolumeSpec>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VolumeError {
    #[error("volume {name} cannot shrink from {current}GB to {requested}GB")]
    Shrink {
        name: String,
        current: i64,
        requested: i64,
    },
}

fn desired_labels(storage: &Storage, provider: &str, region: Option<&str>) -> Labels {
    let mut labels = user_labels(&storage.metadata.labels);
    labels.extend(internal_labels(provider, region, &storage.metadata.scope));
    labels
}

/// A fresh, never-stored volume for `storage`.
pub fn to_volume(storage: &Storage, provider: &str, region: Option<&str>) -> Volume {
    let spec = VolumeSpec {
        size_gb: storage.spec.size_gb,
        sku: storage.spec.sku_ref.name().to_string(),
        source_image: storage.spec.source_image_ref.as_ref().map(|r| r.name().to_string()),
        storage_ref: storage.metadata.key().to_string(),
    };
    let mut volume = Resource::new(storage.name(), spec).with_scope(storage.metadata.scope.clone());
    volume.metadata.labels = desired_labels(storage, provider, region);
    volume.metadata.add_finalizer(PROVISIONER_FINALIZER);
    volume
}

/// Applies the desired state from `storage` onto `volume`, which may be the
/// stored revision.
pub fn apply_storage(
    volume: &mut Volume,
    storage: &Storage,
    provider: &str,
    region: Option<&str>,
) -> Result<(), VolumeError> {
    let stored = volume.metadata.resource_version != 0;
    if stored && storage.spec.size_gb < volume.spec.size_gb {
        return Err(VolumeError::Shrink {
            name: volume.metadata.name.clone(),
            current: volume.spec.size_gb,
            requested: storage.spec.size_gb,
        });
    }
    let desired = to_volume(storage, provider, region);
    volume.spec = desired.spec;
    volume.metadata.labels = desired.metadata.labels;
    volume.metadata.add_finalizer(PROVISIONER_FINALIZER);
    Ok(())
}

/// Provisioned at the current generation.
pub fn is_ready(volume: &Volume) -> bool {
    volume.status.as_ref().is_some_and(|status| {
        status.state == ConditionState::Active
            && status.observed_generation >= volume.metadata.generation
    })
}
