//! Test utilities for the agent reconciler

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloudinit::{CloudInitError, CommandRunner, RunCommand};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const TEST_NAMESPACE: &str = "default";

/// Registered, unbound host
pub fn create_test_host(name: &str) -> ByoHost {
    ByoHost {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some([("role".to_string(), "worker".to_string())].into()),
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

/// Host bound to machine `m1` of cluster `c1`, bootstrap secret referenced,
/// no installation secret.
pub fn bound_host(name: &str) -> ByoHost {
    let mut host = create_test_host(name);
    let labels = host.metadata.labels.get_or_insert_with(Default::default);
    labels.insert(CLUSTER_NAME_LABEL.to_string(), "c1".to_string());
    labels.insert(ATTACHED_BYOMACHINE_LABEL.to_string(), "default.m1".to_string());
    host.metadata.annotations = Some(
        [
            (END_POINT_IP_ANNOTATION.to_string(), "10.0.0.10".to_string()),
            (K8S_VERSION_ANNOTATION.to_string(), "v1.30.1".to_string()),
        ]
        .into(),
    );
    host.spec.bootstrap_secret = Some(SecretReference::new("m1-bootstrap", TEST_NAMESPACE));
    if let Some(status) = host.status.as_mut() {
        status.machine_ref = Some(ObjectReference {
            api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
            kind: Some("ByoMachine".to_string()),
            name: "m1".to_string(),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some("uid-m1".to_string()),
        });
    }
    host
}

pub fn mark_cleanup(host: &mut ByoHost) {
    host.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(HOST_CLEANUP_ANNOTATION.to_string(), String::new());
}

/// Runner that records commands and fails the ones containing `fail_on`
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    commands: Arc<Mutex<Vec<RunCommand>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &RunCommand) -> Result<(), CloudInitError> {
        self.commands.lock().unwrap().push(command.clone());
        let display = command.to_string();
        match self.fail_on.lock().unwrap().as_deref() {
            Some(needle) if display.contains(needle) => Err(CloudInitError::CommandFailed {
                command: display,
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
