//! K8sInstallerConfig and K8sInstallerConfigTemplate CRDs
//!
//! A K8sInstallerConfig is created per ByoMachine from a template and reconciled
//! into a secret holding the `install` and `uninstall` scripts for the bound host.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::references::SecretReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "K8sInstallerConfig",
    namespaced,
    status = "K8sInstallerConfigStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigSpec {
    /// Repository hosting the bundles (e.g., "projects.registry.vmware.com/cluster_api_provider_bringyourownhost")
    pub bundle_repo: String,

    /// Bundle type, currently only "k8s"
    #[serde(default = "default_bundle_type")]
    pub bundle_type: String,
}

fn default_bundle_type() -> String {
    "k8s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigStatus {
    /// Scripts have been generated
    #[serde(default)]
    pub ready: bool,

    /// Secret holding the generated scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_secret: Option<SecretReference>,

    /// Installer config conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl K8sInstallerConfig {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "K8sInstallerConfigTemplate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigTemplateSpec {
    /// Template cloned into per-machine installer configs
    pub template: K8sInstallerConfigTemplateResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigTemplateResource {
    /// Spec copied into each generated K8sInstallerConfig
    pub spec: K8sInstallerConfigSpec,
}
