//! References from one resource to another.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured reference. `resource` is `<type>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReferenceObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace: String,
}

/// Either a structured reference or a plain URN.
///
/// Decoding a value that is neither fails instead of producing an empty
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, expecting = "a reference object or a URN string")]
pub enum Reference {
    Object(ReferenceObject),
    Urn(String),
}

impl Reference {
    pub fn urn(urn: impl Into<String>) -> Self {
        Reference::Urn(urn.into())
    }

    pub fn object(resource: impl Into<String>) -> Self {
        Reference::Object(ReferenceObject {
            provider: String::new(),
            region: String::new(),
            resource: resource.into(),
            tenant: String::new(),
            workspace: String::new(),
        })
    }

    /// The trailing name segment of the referenced resource.
    pub fn name(&self) -> &str {
        let path = match self {
            Reference::Object(obj) => obj.resource.as_str(),
            Reference::Urn(urn) => urn.as_str(),
        };
        path.rsplit(['/', ':']).next().unwrap_or(path)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Object(obj) => write!(f, "{}", obj.resource),
            Reference::Urn(urn) => write!(f, "{}", urn),
        }
    }
}
