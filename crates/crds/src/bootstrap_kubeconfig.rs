//! BootstrapKubeconfig CRD
//!
//! Requests a short-lived bootstrap-token kubeconfig for new host agents.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "BootstrapKubeconfig",
    namespaced,
    status = "BootstrapKubeconfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapKubeconfigSpec {
    /// API server URL (https)
    pub apiserver: String,

    /// Base64 encoded PEM CA bundle of the API server
    pub certificate_authority_data: String,

    /// Skip TLS verification of the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapKubeconfigStatus {
    /// Rendered kubeconfig; once set it is never regenerated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_kubeconfig_data: Option<String>,
}

impl BootstrapKubeconfig {
    pub fn rendered(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bootstrap_kubeconfig_data.as_deref())
    }
}
