//! Object identity and metadata, following K8s conventions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form string map used for labels, annotations and extensions.
pub type Labels = BTreeMap<String, String>;

/// Identity of an object within its kind.
///
/// When used as a watch selector an empty field acts as a wildcard, so
/// `ObjectKey::default()` observes every object of the kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-global object.
    pub fn global(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    /// Returns true if `other` is selected by this key.
    pub fn selects(&self, other: &ObjectKey) -> bool {
        (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Joins tenant and workspace in a namespace.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Tenancy scope of an object. Both parts empty means global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace: String,
}

impl Scope {
    pub fn new(tenant: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: workspace.into(),
        }
    }

    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self::new(tenant, "")
    }

    pub fn is_global(&self) -> bool {
        self.tenant.is_empty() && self.workspace.is_empty()
    }

    /// The store namespace backing this scope.
    pub fn namespace(&self) -> String {
        match (self.tenant.is_empty(), self.workspace.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.tenant.clone(),
            _ => format!("{}{}{}", self.tenant, NAMESPACE_SEPARATOR, self.workspace),
        }
    }

    /// Rejects scopes whose namespace another scope could also produce.
    ///
    /// The tenant may not contain the separator, so a namespace splits back
    /// at its first separator. Neither part may contain `/`, which
    /// delimits keys.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant.contains(NAMESPACE_SEPARATOR) {
            return Err(format!(
                "tenant '{}' must not contain '{}'",
                self.tenant, NAMESPACE_SEPARATOR
            ));
        }
        if self.tenant.contains('/') || self.workspace.contains('/') {
            return Err(format!("scope '{}' must not contain '/'", self.namespace()));
        }
        if self.tenant.is_empty() && !self.workspace.is_empty() {
            return Err(format!("workspace '{}' requires a tenant", self.workspace));
        }
        Ok(())
    }
}

/// Metadata for a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Unique name within the scope and kind.
    pub name: String,

    #[serde(flatten)]
    pub scope: Scope,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Labels,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: Labels,

    /// Markers that block physical removal while present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Store revision of this object, used for optimistic concurrency.
    /// Zero means "unconditional" on writes.
    #[serde(default)]
    pub resource_version: u64,

    /// Incremented by the store on every spec change.
    #[serde(default)]
    pub generation: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn namespace(&self) -> String {
        self.scope.namespace()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name.clone())
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Adds a finalizer; returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Removes a finalizer; returns false if it was absent.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// Deletion has been requested.
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Deletion has been requested and nothing blocks removal any more.
    pub fn is_removed(&self) -> bool {
        self.is_terminating() && self.finalizers.is_empty()
    }
}
