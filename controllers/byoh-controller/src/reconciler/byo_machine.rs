//! ByoMachine reconciler
//!
//! Binds each ByoMachine to a ByoHost, provisions its K8sInstallerConfig,
//! waits for the agent to bootstrap the node and then stamps the node's
//! provider ID on the machine. Deletion hands the host back to its agent
//! through the cleanup annotation.

use std::sync::Arc;
use std::time::Duration;

use crds::capi::{Cluster, Machine, has_paused_annotation, owner_machine_name};
use crds::machine_reasons::*;
use crds::{
    ATTACHED_BYOMACHINE_LABEL, BYO_HOST_READY, BYOMACHINE_FINALIZER, ByoCluster, ByoHost,
    ByoMachine, ByoMachineStatus, CLUSTER_NAME_LABEL, ConditionSeverity, K8S_NODE_BOOTSTRAP_SUCCEEDED,
    K8sInstallerConfig, K8sInstallerConfigTemplate, READY_CONDITION, SecretReference,
    TypedObjectReference, UNINSTALL_SCRIPT_KEY, is_true, mark_false, mark_true, reason_of,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube_runtime::reflector::ObjectRef;
use serde_json::json;
use tracing::{debug, info, warn};

use super::Reconciler;
use super::host_matcher::{self, Attachment, BindOutcome, BindRequest, BootstrapHints};
use crate::error::ControllerError;
use crate::events::{actions, reasons};

/// Requeue while waiting on Cluster API objects that are not watched here
pub const WAIT_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue after finding no free host
pub const NO_HOSTS_REQUEUE: Duration = Duration::from_secs(10);

const INSTALLER_TEMPLATE_KIND: &str = "K8sInstallerConfigTemplate";

/// Where a machine stands before a host may be searched for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Paused,
    WaitingForInfrastructure,
    WaitingForDataSecret,
    /// Ready to bind, with the name of the bootstrap data secret
    Ready(String),
}

impl Precondition {
    /// BYOHostReady reason while blocked
    fn reason(&self) -> Option<&'static str> {
        match self {
            Precondition::Paused => Some(CLUSTER_OR_RESOURCE_PAUSED),
            Precondition::WaitingForInfrastructure => Some(WAITING_FOR_CLUSTER_INFRASTRUCTURE),
            Precondition::WaitingForDataSecret => Some(WAITING_FOR_BOOTSTRAP_DATA_SECRET),
            Precondition::Ready(_) => None,
        }
    }
}

pub fn check_preconditions(machine: &ByoMachine, cluster: &Cluster, owner: &Machine) -> Precondition {
    if cluster.spec.paused || has_paused_annotation(&machine.metadata) {
        return Precondition::Paused;
    }
    if !cluster.infrastructure_ready() {
        return Precondition::WaitingForInfrastructure;
    }
    match owner.data_secret_name() {
        Some(secret) if !secret.is_empty() => Precondition::Ready(secret.to_string()),
        _ => Precondition::WaitingForDataSecret,
    }
}

/// State of the machine's K8sInstallerConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerState {
    Pending,
    Unsupported(String),
    Ready(SecretReference),
}

pub fn installer_state(config: &K8sInstallerConfig) -> InstallerState {
    let Some(status) = config.status.as_ref() else {
        return InstallerState::Pending;
    };
    if let (true, Some(secret)) = (status.ready, status.installation_secret.as_ref()) {
        return InstallerState::Ready(secret.clone());
    }
    if reason_of(&status.conditions, READY_CONDITION) == Some(INSTALLATION_NOT_SUPPORTED) {
        let message = crds::get_condition(&status.conditions, READY_CONDITION)
            .and_then(|c| c.message.clone())
            .unwrap_or_default();
        return InstallerState::Unsupported(message);
    }
    InstallerState::Pending
}

/// K8sInstallerConfig for `machine`, cloned from `template` and owned by the machine.
pub fn build_installer_config(
    machine: &ByoMachine,
    template: &K8sInstallerConfigTemplate,
    cluster_name: &str,
) -> Result<K8sInstallerConfig, ControllerError> {
    let owner = machine.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidConfig(format!(
            "ByoMachine {} has no uid to own its installer config",
            machine.name_any()
        ))
    })?;
    Ok(K8sInstallerConfig {
        metadata: ObjectMeta {
            name: Some(machine.name_any()),
            namespace: machine.namespace(),
            labels: Some([(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string())].into()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: template.spec.template.spec.clone(),
        status: None,
    })
}

/// The ByoMachine a host event should wake, from its attached-machine label.
pub fn machine_for_host(host: &ByoHost) -> Option<ObjectRef<ByoMachine>> {
    let value = host.labels().get(ATTACHED_BYOMACHINE_LABEL)?;
    let (namespace, name) = value.split_once('.')?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Mark BYOHostReady false; returns the updated status.
fn not_ready(
    mut status: ByoMachineStatus,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) -> ByoMachineStatus {
    status.ready = false;
    mark_false(&mut status.conditions, BYO_HOST_READY, reason, severity, message);
    status
}

impl Reconciler {
    pub async fn reconcile_byo_machine(
        &self,
        machine: Arc<ByoMachine>,
    ) -> Result<Action, ControllerError> {
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<ByoMachine> = self.namespaced(&namespace);

        finalizer(&api, BYOMACHINE_FINALIZER, machine, |event| async move {
            match event {
                FinalizerEvent::Apply(machine) => self.apply_byo_machine(&machine).await,
                FinalizerEvent::Cleanup(machine) => self.cleanup_byo_machine(&machine).await,
            }
        })
        .await
        .map_err(ControllerError::from)
    }

    pub(crate) async fn apply_byo_machine(&self, machine: &ByoMachine) -> Result<Action, ControllerError> {
        let name = machine.name_any();
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        info!("Reconciling ByoMachine {}/{}", namespace, name);

        let Some(owner_name) = owner_machine_name(&machine.metadata) else {
            info!(
                "ByoMachine {}/{} has no owning Machine yet, waiting",
                namespace, name
            );
            return Ok(Action::await_change());
        };
        let owner = self
            .namespaced::<Machine>(&namespace)
            .get_opt(owner_name)
            .await?
            .ok_or_else(|| {
                ControllerError::MissingObject(format!("Machine {}/{}", namespace, owner_name))
            })?;
        let cluster_name = owner.spec.cluster_name.clone();
        let cluster = self
            .namespaced::<Cluster>(&namespace)
            .get_opt(&cluster_name)
            .await?
            .ok_or_else(|| {
                ControllerError::MissingObject(format!("Cluster {}/{}", namespace, cluster_name))
            })?;

        let status = machine.status.clone().unwrap_or_default();
        let precondition = check_preconditions(machine, &cluster, &owner);
        if precondition == Precondition::Paused {
            info!("ByoMachine {}/{} or its cluster is paused", namespace, name);
            let status = not_ready(status, CLUSTER_OR_RESOURCE_PAUSED, ConditionSeverity::Info, "");
            self.write_machine_status(machine, status).await?;
            return Ok(Action::await_change());
        }

        let machine_ref = host_matcher::machine_reference(machine)?;
        let host = match host_matcher::attached_host(self.host_client.as_ref(), &machine_ref).await? {
            Attachment::Bound(host) => *host,
            Attachment::Releasing(host) => {
                let host_name = host.name_any();
                if !host.cleanup_requested() {
                    warn!(
                        "ByoHost {}/{} is left over from an earlier ByoMachine {}, releasing it",
                        namespace, host_name, name
                    );
                    host_matcher::request_cleanup(self.host_client.as_ref(), &namespace, &host_name)
                        .await?;
                }
                let status = not_ready(
                    status,
                    BYO_HOSTS_UNAVAILABLE,
                    ConditionSeverity::Info,
                    format!("ByoHost {} is still being released", host_name),
                );
                self.write_machine_status(machine, status).await?;
                return Ok(Action::requeue(NO_HOSTS_REQUEUE));
            }
            Attachment::Unattached => {
                let data_secret = match &precondition {
                    Precondition::Ready(secret) => secret.clone(),
                    blocked => {
                        let reason = blocked.reason().unwrap_or(WAITING_FOR_CLUSTER_INFRASTRUCTURE);
                        debug!("ByoMachine {}/{} waiting: {}", namespace, name, reason);
                        let status = not_ready(status, reason, ConditionSeverity::Info, "");
                        self.write_machine_status(machine, status).await?;
                        return Ok(Action::requeue(WAIT_REQUEUE));
                    }
                };
                match self.bind_machine(machine, &cluster, &owner, &data_secret).await? {
                    Some(host) => host,
                    None => {
                        let status = not_ready(
                            status,
                            BYO_HOSTS_UNAVAILABLE,
                            ConditionSeverity::Info,
                            "no free ByoHost matches the machine selector",
                        );
                        self.write_machine_status(machine, status).await?;
                        return Ok(Action::requeue(NO_HOSTS_REQUEUE));
                    }
                }
            }
        };

        let mut status = status;
        let host_name = host.name_any();
        status.host_info = host.status.as_ref().and_then(|s| s.host_details.clone());

        if let Some(installer_ref) = &machine.spec.installer_ref {
            match self.ensure_installer_config(machine, installer_ref, &cluster_name).await? {
                InstallerState::Pending => {
                    debug!("Waiting for installation scripts of ByoMachine {}/{}", namespace, name);
                    let status = not_ready(
                        status,
                        INSTALLER_CONFIG_UNAVAILABLE,
                        ConditionSeverity::Info,
                        "",
                    );
                    self.write_machine_status(machine, status).await?;
                    return Ok(Action::requeue(WAIT_REQUEUE));
                }
                InstallerState::Unsupported(message) => {
                    warn!("No installer for ByoMachine {}/{}: {}", namespace, name, message);
                    let status = not_ready(
                        status,
                        INSTALLATION_NOT_SUPPORTED,
                        ConditionSeverity::Error,
                        message,
                    );
                    self.write_machine_status(machine, status).await?;
                    return Ok(Action::await_change());
                }
                InstallerState::Ready(secret) => {
                    let uninstall = self.uninstall_script(&secret, &namespace).await?;
                    host_matcher::attach_installation(
                        self.host_client.as_ref(),
                        &namespace,
                        &host_name,
                        &secret,
                        &uninstall,
                    )
                    .await?;
                }
            }
        }

        if !is_true(host.conditions(), K8S_NODE_BOOTSTRAP_SUCCEEDED) {
            debug!(
                "ByoHost {}/{} has not bootstrapped its node yet",
                namespace, host_name
            );
            let status = not_ready(status, WAITING_FOR_NODE_BOOTSTRAP, ConditionSeverity::Info, "");
            self.write_machine_status(machine, status).await?;
            return Ok(Action::await_change());
        }

        if !(machine.is_ready() && machine.spec.provider_id.is_some()) {
            let provider_id = match self
                .ensure_provider_id(&namespace, &cluster_name, &host_name)
                .await
            {
                Ok(id) => id,
                Err(e @ ControllerError::ProviderId(_)) => {
                    self.publish(
                        machine,
                        EventType::Warning,
                        reasons::PROVIDER_ID_FAILED,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                    let status = not_ready(
                        status,
                        NODE_PROVIDER_ID_FAILED,
                        ConditionSeverity::Error,
                        e.to_string(),
                    );
                    self.write_machine_status(machine, status).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            if machine.spec.provider_id.as_deref() != Some(provider_id.as_str()) {
                self.namespaced::<ByoMachine>(&namespace)
                    .patch(
                        &name,
                        &PatchParams::default(),
                        &Patch::Merge(&json!({"spec": {"providerID": provider_id}})),
                    )
                    .await?;
                info!("ByoMachine {}/{} has provider ID {}", namespace, name, provider_id);
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::PROVIDER_ID_SET,
                    actions::RECONCILE,
                    Some(provider_id),
                )
                .await;
            }
        }

        status.ready = true;
        status.failure_reason = None;
        status.failure_message = None;
        mark_true(&mut status.conditions, BYO_HOST_READY);
        self.write_machine_status(machine, status).await?;
        Ok(Action::await_change())
    }

    async fn bind_machine(
        &self,
        machine: &ByoMachine,
        cluster: &Cluster,
        owner: &Machine,
        data_secret: &str,
    ) -> Result<Option<ByoHost>, ControllerError> {
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        let byo_cluster = self.infrastructure_cluster(&namespace, cluster).await?;

        let endpoint_host = byo_cluster
            .as_ref()
            .map(|bc| bc.spec.control_plane_endpoint.host.as_str())
            .filter(|h| !h.is_empty())
            .unwrap_or(cluster.spec.control_plane_endpoint.host.as_str());
        let hints = BootstrapHints {
            endpoint_host: Some(endpoint_host),
            k8s_version: owner.spec.version.as_deref(),
            bundle_registry: byo_cluster
                .as_ref()
                .and_then(|bc| bc.spec.bundle_lookup_base_registry.as_deref()),
            bundle_tag: byo_cluster
                .as_ref()
                .and_then(|bc| bc.spec.bundle_lookup_tag.as_deref()),
        };
        let request = BindRequest::new(
            machine,
            &owner.spec.cluster_name,
            SecretReference::new(data_secret, &namespace),
            hints.annotations(),
        )?;

        match host_matcher::bind_host(self.host_client.as_ref(), &request).await? {
            BindOutcome::Bound(host) => {
                self.metrics.host_bound();
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::HOST_BOUND,
                    actions::BIND,
                    Some(format!("Bound ByoHost {}", host.name_any())),
                )
                .await;
                Ok(Some(*host))
            }
            BindOutcome::NoHosts => {
                info!(
                    "No free ByoHost for ByoMachine {}/{}",
                    namespace,
                    machine.name_any()
                );
                self.metrics.hosts_unavailable();
                self.publish(
                    machine,
                    EventType::Warning,
                    reasons::HOSTS_UNAVAILABLE,
                    actions::BIND,
                    None,
                )
                .await;
                Ok(None)
            }
        }
    }

    /// The ByoCluster a Cluster points at, if it points at one.
    async fn infrastructure_cluster(
        &self,
        namespace: &str,
        cluster: &Cluster,
    ) -> Result<Option<ByoCluster>, ControllerError> {
        let Some(infra) = cluster
            .spec
            .infrastructure_ref
            .as_ref()
            .filter(|r| r.kind.as_deref() == Some("ByoCluster"))
        else {
            return Ok(None);
        };
        let infra_ns = infra.namespace.as_deref().unwrap_or(namespace);
        let byo_cluster = self
            .namespaced::<ByoCluster>(infra_ns)
            .get_opt(&infra.name)
            .await?
            .ok_or_else(|| {
                ControllerError::MissingObject(format!("ByoCluster {}/{}", infra_ns, infra.name))
            })?;
        Ok(Some(byo_cluster))
    }

    async fn ensure_installer_config(
        &self,
        machine: &ByoMachine,
        installer_ref: &TypedObjectReference,
        cluster_name: &str,
    ) -> Result<InstallerState, ControllerError> {
        if installer_ref.kind != INSTALLER_TEMPLATE_KIND {
            return Err(ControllerError::InvalidConfig(format!(
                "installerRef of ByoMachine {} has kind {}, expected {}",
                machine.name_any(),
                installer_ref.kind,
                INSTALLER_TEMPLATE_KIND
            )));
        }
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        let api = self.namespaced::<K8sInstallerConfig>(&namespace);
        if let Some(config) = api.get_opt(&machine.name_any()).await? {
            return Ok(installer_state(&config));
        }

        let template_ns = installer_ref.namespace.as_deref().unwrap_or(&namespace);
        let template = self
            .namespaced::<K8sInstallerConfigTemplate>(template_ns)
            .get_opt(&installer_ref.name)
            .await?
            .ok_or_else(|| {
                ControllerError::MissingObject(format!(
                    "K8sInstallerConfigTemplate {}/{}",
                    template_ns, installer_ref.name
                ))
            })?;
        let config = build_installer_config(machine, &template, cluster_name)?;
        info!(
            "Creating K8sInstallerConfig {}/{} from template {}",
            namespace,
            machine.name_any(),
            installer_ref.name
        );
        match api.create(&PostParams::default(), &config).await {
            Ok(created) => Ok(installer_state(&created)),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(InstallerState::Pending),
            Err(e) => Err(e.into()),
        }
    }

    async fn uninstall_script(
        &self,
        secret_ref: &SecretReference,
        namespace: &str,
    ) -> Result<String, ControllerError> {
        let secret_ns = secret_ref.namespace_or(namespace);
        let secret = self
            .namespaced::<Secret>(secret_ns)
            .get_opt(&secret_ref.name)
            .await?
            .ok_or_else(|| {
                ControllerError::MissingObject(format!(
                    "installation secret {}/{}",
                    secret_ns, secret_ref.name
                ))
            })?;
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(UNINSTALL_SCRIPT_KEY))
            .and_then(|b| String::from_utf8(b.0.clone()).ok())
            .ok_or_else(|| {
                ControllerError::MissingObject(format!(
                    "{} script in secret {}/{}",
                    UNINSTALL_SCRIPT_KEY, secret_ns, secret_ref.name
                ))
            })
    }

    pub(crate) async fn cleanup_byo_machine(&self, machine: &ByoMachine) -> Result<Action, ControllerError> {
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        info!("Releasing ByoMachine {}/{}", namespace, machine.name_any());

        let machine_ref = host_matcher::machine_reference(machine)?;
        if let Attachment::Bound(host) | Attachment::Releasing(host) =
            host_matcher::attached_host(self.host_client.as_ref(), &machine_ref).await?
        {
            let host_name = host.name_any();
            if host_matcher::request_cleanup(self.host_client.as_ref(), &namespace, &host_name).await? {
                info!("Requested cleanup of ByoHost {}/{}", namespace, host_name);
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::HOST_CLEANUP_REQUESTED,
                    actions::RELEASE,
                    Some(format!("Releasing ByoHost {}", host_name)),
                )
                .await;
            }
        }
        Ok(Action::await_change())
    }

    async fn write_machine_status(
        &self,
        machine: &ByoMachine,
        status: ByoMachineStatus,
    ) -> Result<(), ControllerError> {
        if machine.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        self.namespaced::<ByoMachine>(&namespace)
            .patch_status(
                &machine.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&json!({ "status": status })),
            )
            .await?;
        Ok(())
    }
}
