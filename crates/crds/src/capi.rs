//! Cluster API core types consumed by the BYOH controllers
//!
//! Only the fields the controllers read are modelled. These objects are never
//! written back, so unknown fields are not preserved.

use kube::CustomResource;
use kube::api::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::byo_cluster::ApiEndpoint;
use crate::constants::{CAPI_API_VERSION, PAUSED_ANNOTATION};
use crate::references::ObjectReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reconciliation of this cluster and its objects is paused
    #[serde(default)]
    pub paused: bool,

    /// Control-plane endpoint
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Infrastructure cluster (a ByoCluster for this provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Infrastructure provider reported ready
    #[serde(default)]
    pub infrastructure_ready: bool,
}

impl Cluster {
    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Owning cluster name
    pub cluster_name: String,

    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Kubernetes version (e.g., "v1.30.2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Provider identifier mirrored from the infrastructure machine
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the bootstrap document under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

impl Machine {
    pub fn data_secret_name(&self) -> Option<&str> {
        self.spec.bootstrap.data_secret_name.as_deref()
    }
}

/// Name of the Cluster API `Machine` that owns an object, if any.
pub fn owner_machine_name(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| {
                r.kind == "Machine" && r.api_version.starts_with("cluster.x-k8s.io/")
            })
            .map(|r| r.name.as_str())
    })
}

/// Name of the Cluster API `Cluster` that owns an object, if any.
pub fn owner_cluster_name(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.kind == "Cluster" && r.api_version == CAPI_API_VERSION)
            .map(|r| r.name.as_str())
    })
}

/// True when `meta` carries the paused annotation.
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Strip build metadata from a version (`v1.30.2+vmware.1` -> `v1.30.2`).
pub fn strip_build_metadata(version: &str) -> &str {
    version.split('+').next().unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::collections::BTreeMap;

    #[test]
    fn test_owner_lookup() {
        let meta = ObjectMeta {
            owner_references: Some(vec![
                OwnerReference {
                    api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                    kind: "Machine".to_string(),
                    name: "m-1".to_string(),
                    uid: "u1".to_string(),
                    ..Default::default()
                },
                OwnerReference {
                    api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                    kind: "Cluster".to_string(),
                    name: "c-1".to_string(),
                    uid: "u2".to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(owner_machine_name(&meta), Some("m-1"));
        assert_eq!(owner_cluster_name(&meta), Some("c-1"));
        assert_eq!(owner_machine_name(&ObjectMeta::default()), None);
    }

    #[test]
    fn test_paused_annotation() {
        let meta = ObjectMeta {
            annotations: Some(BTreeMap::from([(
                PAUSED_ANNOTATION.to_string(),
                String::new(),
            )])),
            ..Default::default()
        };
        assert!(has_paused_annotation(&meta));
        assert!(!has_paused_annotation(&ObjectMeta::default()));
    }

    #[test]
    fn test_strip_build_metadata() {
        assert_eq!(strip_build_metadata("v1.30.2+vmware.1"), "v1.30.2");
        assert_eq!(strip_build_metadata("v1.30.2"), "v1.30.2");
    }
}
