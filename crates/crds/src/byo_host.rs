//! ByoHost CRD
//!
//! One bring-your-own host, registered by the agent running on it. The spec is
//! written by the control plane; the status is written by the agent.

use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::constants::{CLUSTER_NAME_LABEL, HOST_CLEANUP_ANNOTATION};
use crate::references::{ObjectReference, SecretReference};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoHost",
    namespaced,
    status = "ByoHostStatus",
    printcolumn = r#"{"name":"OSName","type":"string","jsonPath":".status.hostDetails.osname"}"#,
    printcolumn = r#"{"name":"Arch","type":"string","jsonPath":".status.hostDetails.architecture"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ByoHostSpec {
    /// Bootstrap data secret the agent runs once bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret: Option<SecretReference>,

    /// Installer script secret produced for the bound machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_secret: Option<SecretReference>,

    /// Uninstall script copied from the installation secret, run on release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstallation_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ByoHostStatus {
    /// ByoMachine this host is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ref: Option<ObjectReference>,

    /// Host conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Platform details reported by the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_details: Option<HostInfo>,

    /// Network interfaces reported by the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<NetworkStatus>,
}

/// Host platform information
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct HostInfo {
    /// Operating system name (e.g., "linux")
    #[serde(default, rename = "osname")]
    pub os_name: String,

    /// Operating system image (e.g., "Ubuntu 20.04.4 LTS")
    #[serde(default, rename = "osimage")]
    pub os_image: String,

    /// CPU architecture in Kubernetes notation (e.g., "amd64")
    #[serde(default)]
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Interface name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_name: Option<String>,

    /// Hardware address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,

    /// Addresses assigned to the interface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addrs: Vec<String>,

    /// True for the interface carrying the default route
    #[serde(default)]
    pub is_default: bool,
}

impl ByoHost {
    pub fn machine_ref(&self) -> Option<&ObjectReference> {
        self.status.as_ref().and_then(|s| s.machine_ref.as_ref())
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Bound means a machine reference is set.
    pub fn is_bound(&self) -> bool {
        self.machine_ref().is_some()
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.labels().get(CLUSTER_NAME_LABEL).map(String::as_str)
    }

    pub fn cleanup_requested(&self) -> bool {
        self.annotations().contains_key(HOST_CLEANUP_ANNOTATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_host_info_wire_names() {
        let info = HostInfo {
            os_name: "linux".to_string(),
            os_image: "Ubuntu 20.04.4 LTS".to_string(),
            architecture: "amd64".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["osname"], "linux");
        assert_eq!(json["osimage"], "Ubuntu 20.04.4 LTS");
        assert_eq!(json["architecture"], "amd64");
    }

    #[test]
    fn test_binding_helpers() {
        let mut host = ByoHost {
            metadata: ObjectMeta {
                name: Some("h1".to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([(
                    CLUSTER_NAME_LABEL.to_string(),
                    "c1".to_string(),
                )])),
                ..Default::default()
            },
            spec: ByoHostSpec::default(),
            status: None,
        };
        assert!(!host.is_bound());
        assert_eq!(host.cluster_name(), Some("c1"));
        assert!(!host.cleanup_requested());

        host.status = Some(ByoHostStatus {
            machine_ref: Some(ObjectReference {
                name: "m1".to_string(),
                namespace: Some("default".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(host.is_bound());
        assert!(host.conditions().is_empty());
    }
}
