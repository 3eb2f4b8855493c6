//! Test utilities for unit testing reconcilers
//!
//! Factories for the BYOH and Cluster API objects the reconcilers read.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::http::{Request, Response};
use byoh_client::MockByoHostClient;
use crds::capi::{Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Client;
use serde_json::{Value, json};

use crate::config::ManagerConfig;
use crate::events::RecordingEventPublisher;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;

pub const TEST_NAMESPACE: &str = "default";

/// Unbound host with the given labels
pub fn create_test_host(name: &str, labels: &[(&str, &str)]) -> ByoHost {
    ByoHost {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: ByoHostSpec::default(),
        status: Some(ByoHostStatus {
            host_details: Some(HostInfo {
                os_name: "linux".to_string(),
                os_image: "Ubuntu 22.04.4 LTS".to_string(),
                architecture: "amd64".to_string(),
            }),
            ..Default::default()
        }),
    }
}

fn owner(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        ..Default::default()
    }
}

/// ByoMachine owned by a Cluster API Machine of the same name
pub fn create_test_machine(name: &str, selector: Option<LabelSelector>) -> ByoMachine {
    ByoMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            owner_references: Some(vec![owner(CAPI_API_VERSION, "Machine", name)]),
            ..Default::default()
        },
        spec: ByoMachineSpec {
            selector,
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_capi_machine(
    name: &str,
    cluster_name: &str,
    data_secret: Option<&str>,
) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: cluster_name.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: data_secret.map(str::to_string),
            },
            version: Some("v1.30.2+vmware.1".to_string()),
            provider_id: None,
        },
    }
}

pub fn create_test_cluster(name: &str, infrastructure_ready: bool) -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ClusterSpec {
            paused: false,
            control_plane_endpoint: ApiEndpoint {
                host: "10.0.0.10".to_string(),
                port: 6443,
            },
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
                kind: Some("ByoCluster".to_string()),
                name: name.to_string(),
                namespace: Some(TEST_NAMESPACE.to_string()),
                uid: None,
            }),
        },
        status: Some(ClusterStatus {
            infrastructure_ready,
        }),
    }
}

pub fn create_test_byo_cluster(name: &str, owner_cluster: Option<&str>, port: i32) -> ByoCluster {
    ByoCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            owner_references: owner_cluster
                .map(|c| vec![owner(CAPI_API_VERSION, "Cluster", c)]),
            ..Default::default()
        },
        spec: ByoClusterSpec {
            control_plane_endpoint: ApiEndpoint {
                host: "10.0.0.10".to_string(),
                port,
            },
            ..Default::default()
        },
        status: None,
    }
}

/// K8sInstallerConfig owned by the ByoMachine `machine`
pub fn create_test_installer_config(name: &str, machine: &str) -> K8sInstallerConfig {
    K8sInstallerConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            owner_references: Some(vec![owner(
                INFRASTRUCTURE_API_VERSION,
                "ByoMachine",
                machine,
            )]),
            ..Default::default()
        },
        spec: K8sInstallerConfigSpec {
            bundle_repo: "projects.registry.vmware.com/cluster_api_provider_bringyourownhost"
                .to_string(),
            bundle_type: "k8s".to_string(),
        },
        status: None,
    }
}

/// Host annotations as a plain map, empty when unset
pub fn annotations_of(host: &ByoHost) -> BTreeMap<String, String> {
    host.metadata.annotations.clone().unwrap_or_default()
}

/// Requests seen by a fake API server, as "METHOD path"
pub type RequestLog = Arc<Mutex<Vec<String>>>;

/// Client backed by an in-process API server answering with `respond(method, path)`
pub fn fake_api_client<F>(respond: F) -> (Client, RequestLog)
where
    F: Fn(&str, &str) -> (u16, Value) + Send + Sync + 'static,
{
    let log = RequestLog::default();
    let seen = log.clone();
    let service = tower::service_fn(move |req: Request<kube::client::Body>| {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        seen.lock().unwrap().push(format!("{} {}", method, path));
        let (status, body) = respond(&method, &path);
        async move {
            Response::builder()
                .status(status)
                .body(kube::client::Body::from(serde_json::to_vec(&body).unwrap()))
        }
    });
    (Client::new(service, TEST_NAMESPACE), log)
}

/// API server `Status` body for a missing object
pub fn not_found() -> (u16, Value) {
    (
        404,
        json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": "not found",
            "reason": "NotFound",
            "code": 404
        }),
    )
}

/// Reconciler over `client` and `hosts`, returning the event sink alongside
pub fn create_test_reconciler(
    client: Client,
    hosts: MockByoHostClient,
) -> (Reconciler, RecordingEventPublisher) {
    let events = RecordingEventPublisher::default();
    let config = ManagerConfig::from_lookup(|_| None).unwrap();
    let reconciler = Reconciler::new(
        client,
        hosts,
        events.clone(),
        Arc::new(Metrics::new().unwrap()),
        config,
    );
    (reconciler, events)
}
