//! Well-known labels, annotations, finalizers and condition vocabulary.
//!
//! These strings are part of the wire contract between the controller
//! manager and the host agents, so they live next to the types.

/// API group served by this provider.
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// API version served by this provider.
pub const INFRASTRUCTURE_VERSION: &str = "v1beta1";

/// `apiVersion` string for objects in [`INFRASTRUCTURE_GROUP`].
pub const INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// `apiVersion` string for the Cluster API core group.
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

// Labels

/// Cluster label; present on a host exactly while it is bound.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Attached-machine marker, value `<namespace>.<name>` of the binding ByoMachine.
pub const ATTACHED_BYOMACHINE_LABEL: &str = "byoh.infrastructure.cluster.x-k8s.io/byomachine-name";

// Annotations

/// Cleanup-request marker written by the controller, removed by the agent.
pub const HOST_CLEANUP_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/unregistering";

/// Control-plane endpoint IP handed to the host for bootstrap.
pub const END_POINT_IP_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/endpointip";

/// Target Kubernetes version (without build metadata).
pub const K8S_VERSION_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/k8sversion";

/// Registry the host should pull its bundle from.
pub const BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION: &str =
    "byoh.infrastructure.cluster.x-k8s.io/bundle-registry";

/// Tag of the bundle the host should pull.
pub const BUNDLE_LOOKUP_TAG_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/bundle-tag";

/// Cluster API pause marker.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Annotations the agent strips from a host when it is released.
pub const BINDING_ANNOTATIONS: [&str; 4] = [
    END_POINT_IP_ANNOTATION,
    K8S_VERSION_ANNOTATION,
    BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION,
    BUNDLE_LOOKUP_TAG_ANNOTATION,
];

// Finalizers

pub const BYOMACHINE_FINALIZER: &str = "byomachine.infrastructure.cluster.x-k8s.io";
pub const BYOCLUSTER_FINALIZER: &str = "byocluster.infrastructure.cluster.x-k8s.io";
pub const K8S_INSTALLER_CONFIG_FINALIZER: &str = "k8sinstallerconfig.infrastructure.cluster.x-k8s.io";

// Host identity

/// Prefix of certificate requests submitted by host agents.
pub const CSR_NAME_PREFIX: &str = "byoh-csr-";

/// Prefix of the common name / username of a host agent identity.
pub const HOST_USER_PREFIX: &str = "byoh:host:";

/// Organization every host agent certificate carries.
pub const HOST_ORGANIZATION: &str = "byoh:hosts";

/// Name of the certificate request the agent for `hostname` submits.
pub fn csr_name(hostname: &str) -> String {
    format!("{CSR_NAME_PREFIX}{hostname}")
}

/// Username (and certificate common name) of the agent for `hostname`.
pub fn host_username(hostname: &str) -> String {
    format!("{HOST_USER_PREFIX}{hostname}")
}

// Secrets

/// Key holding the payload in bootstrap-data and workload kubeconfig secrets.
pub const SECRET_VALUE_KEY: &str = "value";

/// Key of the install script in an installation secret.
pub const INSTALL_SCRIPT_KEY: &str = "install";

/// Key of the uninstall script in an installation secret.
pub const UNINSTALL_SCRIPT_KEY: &str = "uninstall";

// Conditions

/// Host condition tracking node bootstrap.
pub const K8S_NODE_BOOTSTRAP_SUCCEEDED: &str = "K8sNodeBootstrapSucceeded";

/// Machine condition tracking whether a bootstrapped host backs it.
pub const BYO_HOST_READY: &str = "BYOHostReady";

/// Standard ready condition.
pub const READY_CONDITION: &str = "Ready";

/// Reasons carried by [`K8S_NODE_BOOTSTRAP_SUCCEEDED`].
pub mod host_reasons {
    pub const WAITING_FOR_MACHINE_REF: &str = "WaitingForMachineRefToBeAssigned";
    pub const BOOTSTRAP_DATA_SECRET_UNAVAILABLE: &str = "BootstrapDataSecretUnavailable";
    pub const INSTALLATION_SECRET_UNAVAILABLE: &str = "InstallationSecretUnavailable";
    pub const K8S_COMPONENTS_INSTALLATION_FAILED: &str = "K8sComponentsInstallationFailed";
    pub const CLOUDINIT_EXECUTION_FAILED: &str = "CloudInitExecutionFailed";
    pub const CLEAN_K8S_NODE_FAILED: &str = "CleanK8sNodeFailed";
    pub const K8S_NODE_ABSENT: &str = "K8sNodeAbsent";
}

/// Reasons carried by [`BYO_HOST_READY`].
pub mod machine_reasons {
    pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
    pub const WAITING_FOR_BOOTSTRAP_DATA_SECRET: &str = "WaitingForBootstrapDataSecret";
    pub const CLUSTER_OR_RESOURCE_PAUSED: &str = "ClusterOrResourcePaused";
    pub const BYO_HOSTS_UNAVAILABLE: &str = "BYOHostsUnavailable";
    pub const INSTALLER_CONFIG_UNAVAILABLE: &str = "InstallerConfigUnavailable";
    pub const INSTALLATION_NOT_SUPPORTED: &str = "InstallationNotSupported";
    pub const WAITING_FOR_NODE_BOOTSTRAP: &str = "WaitingForNodeBootstrap";
    pub const NODE_PROVIDER_ID_FAILED: &str = "NodeProviderIDFailed";
}
