//! ByoCluster CRD
//!
//! Infrastructure cluster for bring-your-own hosts. Carries the control-plane
//! endpoint and where hosts should look up their runtime bundles.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;

/// Default API server port applied when the endpoint leaves it unset
pub const DEFAULT_API_SERVER_PORT: i32 = 6443;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoCluster",
    namespaced,
    status = "ByoClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ByoClusterSpec {
    /// Endpoint used to reach the control plane
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Registry hosting the byoh-bundle images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_lookup_base_registry: Option<String>,

    /// Bundle tag to pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_lookup_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Hostname or IP of the endpoint
    #[serde(default)]
    pub host: String,

    /// Port of the endpoint (0 means unset)
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ByoClusterStatus {
    /// Infrastructure is ready
    #[serde(default)]
    pub ready: bool,

    /// Cluster conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
