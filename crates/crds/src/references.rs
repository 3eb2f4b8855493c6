//! Object references shared by the BYOH CRDs
//!
//! Follows the Kubernetes `ObjectReference` / `SecretReference` shapes, kept as
//! local types so they carry their own schema.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Secret, optionally in another namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret
    pub name: String,

    /// Namespace of the secret (defaults to the namespace of the referencing object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace to look the secret up in, falling back to `default_ns`.
    pub fn namespace_or<'a>(&'a self, default_ns: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_ns)
    }
}

/// Full object reference (used for the bound machine on a host)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// True if this reference points at `namespace/name`.
    pub fn refers_to(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }
}

/// Local reference to an object in the same namespace, with kind and group
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedObjectReference {
    /// API version of the referent (e.g., "infrastructure.cluster.x-k8s.io/v1beta1")
    pub api_version: String,

    /// Kind of the referent (e.g., "K8sInstallerConfigTemplate")
    pub kind: String,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_reference_namespace_fallback() {
        let explicit = SecretReference::new("s", "ns1");
        assert_eq!(explicit.namespace_or("default"), "ns1");

        let implicit = SecretReference {
            name: "s".to_string(),
            namespace: None,
        };
        assert_eq!(implicit.namespace_or("default"), "default");
    }

    #[test]
    fn test_object_reference_refers_to() {
        let reference = ObjectReference {
            name: "m1".to_string(),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        assert!(reference.refers_to("ns", "m1"));
        assert!(!reference.refers_to("other", "m1"));
    }
}
