//! ByoMachine CRD
//!
//! Infrastructure machine backed by one bound ByoHost.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::byo_host::HostInfo;
use crate::conditions::Condition;
use crate::references::TypedObjectReference;
use crate::selector::LabelSelector;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoMachine",
    namespaced,
    status = "ByoMachineStatus",
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineSpec {
    /// Selects candidate hosts; empty matches every unbound host in the namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Provider identifier of the node backed by the bound host
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// K8sInstallerConfigTemplate used to generate install/uninstall scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<TypedObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineStatus {
    /// True once a bootstrapped host backs this machine and its node carries the provider ID
    #[serde(default)]
    pub ready: bool,

    /// Machine conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Platform details of the bound host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_info: Option<HostInfo>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ByoMachine {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}

/// Template for ByoMachines created by higher-level Cluster API objects
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoMachineTemplate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineTemplateSpec {
    /// Template for the generated machines
    pub template: ByoMachineTemplateResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineTemplateResource {
    /// Spec copied into each generated ByoMachine
    pub spec: ByoMachineSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_spec_deserializes_provider_id() {
        let spec: ByoMachineSpec = serde_json::from_value(serde_json::json!({
            "selector": {"matchLabels": {"role": "worker"}},
            "providerID": "byoh://host-1/abc123",
            "installerRef": {
                "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
                "kind": "K8sInstallerConfigTemplate",
                "name": "ubuntu"
            }
        }))
        .unwrap();
        assert_eq!(spec.provider_id.as_deref(), Some("byoh://host-1/abc123"));
        assert_eq!(
            spec.selector.unwrap().match_labels.get("role").map(String::as_str),
            Some("worker")
        );
        assert_eq!(spec.installer_ref.unwrap().kind, "K8sInstallerConfigTemplate");
    }
}
