//! Internal labels stamped onto provider-side objects.
//!
//! Keys under the `internal/` prefix are owned by the engine and are hidden
//! from user-facing label sets.

use super::meta::{Labels, Scope};

pub const INTERNAL_PREFIX: &str = "internal/";
pub const PROVIDER_LABEL: &str = "internal/provider";
pub const REGION_LABEL: &str = "internal/region";
pub const TENANT_LABEL: &str = "internal/tenant";
pub const WORKSPACE_LABEL: &str = "internal/workspace";

pub fn is_internal(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

/// Builds the internal label set for an object owned by `provider`.
pub fn internal_labels(provider: &str, region: Option<&str>, scope: &Scope) -> Labels {
    let mut labels = Labels::new();
    labels.insert(PROVIDER_LABEL.to_string(), provider.to_string());
    if let Some(region) = region.filter(|r| !r.is_empty()) {
        labels.insert(REGION_LABEL.to_string(), region.to_string());
    }
    if !scope.tenant.is_empty() {
        labels.insert(TENANT_LABEL.to_string(), scope.tenant.clone());
    }
    if !scope.workspace.is_empty() {
        labels.insert(WORKSPACE_LABEL.to_string(), scope.workspace.clone());
    }
    labels
}

/// Returns only the user-visible labels.
pub fn user_labels(labels: &Labels) -> Labels {
    labels
        .iter()
        .filter(|(k, _)| !is_internal(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
