//! Host matching and the bind protocol
//!
//! A bind is two writes. The first replaces the host's metadata and spec
//! under its `resourceVersion`, adding the cluster label, the attached-machine
//! label, the bootstrap secret reference and the bootstrap annotations.
//! Candidates are listed with "no cluster label" as part of the selector, so
//! of several concurrent binders only one can win that write; the others get
//! a conflict, re-list, and no longer see the host.
//!
//! The second write sets `status.machineRef` through the status subresource.
//! If it is lost, the next reconcile finds the host through its
//! attached-machine label and repeats it ([`attached_host`]).

use std::collections::BTreeMap;

use byoh_client::ByoHostClientTrait;
use crds::{
    ATTACHED_BYOMACHINE_LABEL, BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION,
    BUNDLE_LOOKUP_TAG_ANNOTATION, ByoHost, ByoMachine, CLUSTER_NAME_LABEL,
    END_POINT_IP_ANNOTATION, HOST_CLEANUP_ANNOTATION, INFRASTRUCTURE_API_VERSION,
    K8S_VERSION_ANNOTATION, LabelSelector, ObjectReference, SecretReference,
    capi::strip_build_metadata,
};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::error::ControllerError;

/// Re-list attempts after losing a bind race
pub const MAX_BIND_ATTEMPTS: u32 = 5;

/// Attempts for read-modify-write updates of a host
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Value of the attached-machine label for a machine.
pub fn attached_label_value(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// Full reference to a ByoMachine, as stored in `status.machineRef`.
pub fn machine_reference(machine: &ByoMachine) -> Result<ObjectReference, ControllerError> {
    let name = machine
        .meta()
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig("ByoMachine missing name".to_string()))?;
    Ok(ObjectReference {
        api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
        kind: Some("ByoMachine".to_string()),
        name,
        namespace: machine.namespace(),
        uid: machine.uid(),
    })
}

/// Bootstrap details handed to the agent through host annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapHints<'a> {
    pub endpoint_host: Option<&'a str>,
    pub k8s_version: Option<&'a str>,
    pub bundle_registry: Option<&'a str>,
    pub bundle_tag: Option<&'a str>,
}

impl BootstrapHints<'_> {
    /// Annotations to write on bind; empty values are left out.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let version = self.k8s_version.map(strip_build_metadata);
        [
            (END_POINT_IP_ANNOTATION, self.endpoint_host),
            (K8S_VERSION_ANNOTATION, version),
            (BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION, self.bundle_registry),
            (BUNDLE_LOOKUP_TAG_ANNOTATION, self.bundle_tag),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
    }
}

/// Everything needed to claim a host for one machine
#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub namespace: String,
    pub machine_ref: ObjectReference,
    pub cluster_name: String,
    pub selector: LabelSelector,
    pub bootstrap_secret: SecretReference,
    pub annotations: BTreeMap<String, String>,
}

impl BindRequest {
    pub fn new(
        machine: &ByoMachine,
        cluster_name: &str,
        bootstrap_secret: SecretReference,
        annotations: BTreeMap<String, String>,
    ) -> Result<Self, ControllerError> {
        let machine_ref = machine_reference(machine)?;
        let namespace = machine_ref
            .namespace
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("ByoMachine missing namespace".to_string()))?;
        Ok(Self {
            namespace,
            machine_ref,
            cluster_name: cluster_name.to_string(),
            selector: machine.spec.selector.clone().unwrap_or_default(),
            bootstrap_secret,
            annotations,
        })
    }

    /// Machine selector intersected with "not bound to any cluster".
    pub fn candidate_selector(&self) -> LabelSelector {
        self.selector.without_label(CLUSTER_NAME_LABEL)
    }

    fn attached_value(&self) -> String {
        attached_label_value(&self.namespace, &self.machine_ref.name)
    }

    /// Apply the metadata and spec half of a bind to `host`.
    fn claim(&self, host: &mut ByoHost) {
        let labels = host.labels_mut();
        labels.insert(CLUSTER_NAME_LABEL.to_string(), self.cluster_name.clone());
        labels.insert(ATTACHED_BYOMACHINE_LABEL.to_string(), self.attached_value());

        let annotations = host.annotations_mut();
        for (key, value) in &self.annotations {
            annotations.insert(key.clone(), value.clone());
        }

        host.spec.bootstrap_secret = Some(self.bootstrap_secret.clone());
    }
}

#[derive(Debug)]
pub enum BindOutcome {
    /// The host now carries the machine reference
    Bound(Box<ByoHost>),
    /// No free host matched the selector
    NoHosts,
}

/// A listed candidate is usable unless it is still being released.
fn is_free(host: &ByoHost) -> bool {
    !host.is_bound() && !host.cleanup_requested()
}

/// Find a free host for `request` and bind it.
pub async fn bind_host(
    client: &dyn ByoHostClientTrait,
    request: &BindRequest,
) -> Result<BindOutcome, ControllerError> {
    let selector = request.candidate_selector();

    for attempt in 1..=MAX_BIND_ATTEMPTS {
        let candidates = client.list_hosts(&request.namespace, &selector).await?;
        let Some(candidate) = candidates.into_iter().find(is_free) else {
            return Ok(BindOutcome::NoHosts);
        };

        let host_name = candidate.name_any();
        let mut claimed = candidate;
        request.claim(&mut claimed);

        match client.replace_host(&claimed).await {
            Ok(host) => {
                info!(
                    "Claimed ByoHost {}/{} for ByoMachine {}",
                    request.namespace, host_name, request.machine_ref.name
                );
                let bound = complete_binding(client, &request.machine_ref, host).await?;
                return Ok(BindOutcome::Bound(Box::new(bound)));
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    "Lost bind race for ByoHost {}/{} (attempt {}/{}), re-listing",
                    request.namespace, host_name, attempt, MAX_BIND_ATTEMPTS
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ControllerError::Conflict(format!(
        "no host could be claimed for ByoMachine {}/{} after {} attempts",
        request.namespace, request.machine_ref.name, MAX_BIND_ATTEMPTS
    )))
}

/// Write `machine_ref` into the status of an already claimed host.
async fn complete_binding(
    client: &dyn ByoHostClientTrait,
    machine_ref: &ObjectReference,
    host: ByoHost,
) -> Result<ByoHost, ControllerError> {
    if host.machine_ref() == Some(machine_ref) {
        return Ok(host);
    }
    let namespace = host.namespace().unwrap_or_default();
    let name = host.name_any();
    let mut status = host.status.clone().unwrap_or_default();
    status.machine_ref = Some(machine_ref.clone());
    Ok(client.patch_host_status(&namespace, &name, &status).await?)
}

/// The host carrying the attached label of `namespace/machine`, as is.
pub async fn find_attached(
    client: &dyn ByoHostClientTrait,
    namespace: &str,
    machine: &str,
) -> Result<Option<ByoHost>, ControllerError> {
    let selector = LabelSelector {
        match_labels: BTreeMap::from([(
            ATTACHED_BYOMACHINE_LABEL.to_string(),
            attached_label_value(namespace, machine),
        )]),
        ..Default::default()
    };
    let hosts = client.list_hosts(namespace, &selector).await?;
    if hosts.len() > 1 {
        warn!(
            "{} ByoHosts carry the attached label of ByoMachine {}/{}",
            hosts.len(),
            namespace,
            machine
        );
    }
    Ok(hosts.into_iter().next())
}

/// What carries a machine's attached-machine label
#[derive(Debug)]
pub enum Attachment {
    /// No host is attached
    Unattached,
    /// The host is bound to this very machine
    Bound(Box<ByoHost>),
    /// The host is being released, or still references an earlier machine
    /// of the same name
    Releasing(Box<ByoHost>),
}

/// The host claimed by a machine, completing an interrupted bind.
///
/// A host only counts as bound when its `machineRef` carries the machine's
/// uid and no cleanup is pending.
pub async fn attached_host(
    client: &dyn ByoHostClientTrait,
    machine_ref: &ObjectReference,
) -> Result<Attachment, ControllerError> {
    let namespace = machine_ref.namespace.clone().unwrap_or_default();
    let Some(host) = find_attached(client, &namespace, &machine_ref.name).await? else {
        return Ok(Attachment::Unattached);
    };
    if host.cleanup_requested() {
        return Ok(Attachment::Releasing(Box::new(host)));
    }
    match host.machine_ref() {
        Some(bound) if bound.uid == machine_ref.uid => Ok(Attachment::Bound(Box::new(host))),
        Some(bound) => {
            debug!(
                "ByoHost {}/{} still references ByoMachine uid {:?}",
                namespace,
                host.name_any(),
                bound.uid
            );
            Ok(Attachment::Releasing(Box::new(host)))
        }
        None => {
            info!(
                "Completing interrupted bind of ByoHost {}/{} to ByoMachine {}",
                namespace,
                host.name_any(),
                machine_ref.name
            );
            let host = complete_binding(client, machine_ref, host).await?;
            Ok(Attachment::Bound(Box::new(host)))
        }
    }
}

/// Read-modify-write of a host's metadata and spec with conflict retries.
///
/// `mutate` returns false when the host already has the desired state, in
/// which case nothing is written. Returns `None` if the host does not exist.
pub async fn update_host<F>(
    client: &dyn ByoHostClientTrait,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<Option<ByoHost>, ControllerError>
where
    F: FnMut(&mut ByoHost) -> bool + Send,
{
    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let Some(mut host) = client.get_host(namespace, name).await? else {
            return Ok(None);
        };
        if !mutate(&mut host) {
            return Ok(Some(host));
        }
        match client.replace_host(&host).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ControllerError::Conflict(format!(
        "ByoHost {}/{} kept changing while being updated",
        namespace, name
    )))
}

/// Ask the agent on `host` to tear the node down. Returns true if the
/// annotation was newly added.
pub async fn request_cleanup(
    client: &dyn ByoHostClientTrait,
    namespace: &str,
    name: &str,
) -> Result<bool, ControllerError> {
    let mut added = false;
    update_host(client, namespace, name, |host| {
        added = false;
        if host.cleanup_requested() {
            return false;
        }
        host.annotations_mut()
            .insert(HOST_CLEANUP_ANNOTATION.to_string(), String::new());
        added = true;
        true
    })
    .await?;
    Ok(added)
}

/// Point the host at its installation secret and copy the uninstall script.
pub async fn attach_installation(
    client: &dyn ByoHostClientTrait,
    namespace: &str,
    name: &str,
    secret: &SecretReference,
    uninstall_script: &str,
) -> Result<(), ControllerError> {
    update_host(client, namespace, name, |host| {
        if host.spec.installation_secret.as_ref() == Some(secret)
            && host.spec.uninstallation_script.as_deref() == Some(uninstall_script)
        {
            return false;
        }
        host.spec.installation_secret = Some(secret.clone());
        host.spec.uninstallation_script = Some(uninstall_script.to_string());
        true
    })
    .await?;
    Ok(())
}
