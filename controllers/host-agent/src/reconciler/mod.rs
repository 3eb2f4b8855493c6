//! Reconcile of the agent's own host record.
//!
//! Each pass asks [`plan::plan`] what to do, runs the local side effects and
//! reports the outcome in the `K8sNodeBootstrapSucceeded` condition. Status
//! writes always start from a fresh read so a machine reference written by
//! the controller manager in the meantime is never lost.

pub mod plan;


use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use byoh_client::{ByoHostClientTrait, ByohClientError};
use cloudinit::{CommandRunner, FileWriter, RunCommand, ScriptExecutor, TemplateContext};
use crds::{
    ATTACHED_BYOMACHINE_LABEL, BINDING_ANNOTATIONS, ByoHost, ByoHostStatus, CLUSTER_NAME_LABEL,
    Condition, ConditionSeverity, HOST_CLEANUP_ANNOTATION, HostInfo, INSTALL_SCRIPT_KEY,
    K8S_NODE_BOOTSTRAP_SUCCEEDED, NetworkStatus, SECRET_VALUE_KEY, SecretReference, host_reasons,
    set_condition,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::hostinfo;
use crate::metrics::Metrics;
use crate::secrets::{SecretReader, text_value};
use plan::{LocalState, Step, plan};

/// Written once the bootstrap document ran to completion
pub const BOOTSTRAP_SENTINEL: &str = "/run/cluster-api/bootstrap-success.complete";

/// Written once the install script ran to completion
pub const INSTALL_SENTINEL: &str = "/var/lib/byoh/install-success.complete";

/// Requeue for idle and bootstrapped hosts; refreshes host details
const HEARTBEAT: Duration = Duration::from_secs(300);

const MAX_RELEASE_ATTEMPTS: u32 = 5;

const BUNDLE_DIR_MODE: u32 = 0o700;

/// Local files the agent owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub bootstrap_sentinel: PathBuf,
    pub install_sentinel: PathBuf,
    pub download_path: PathBuf,
}

impl AgentPaths {
    pub fn new(download_path: impl Into<PathBuf>) -> Self {
        Self {
            bootstrap_sentinel: PathBuf::from(BOOTSTRAP_SENTINEL),
            install_sentinel: PathBuf::from(INSTALL_SENTINEL),
            download_path: download_path.into(),
        }
    }

    /// Same layout below `root`.
    pub fn under(root: &Path) -> Self {
        let rebase = |path: &str| root.join(path.trim_start_matches('/'));
        Self {
            bootstrap_sentinel: rebase(BOOTSTRAP_SENTINEL),
            install_sentinel: rebase(INSTALL_SENTINEL),
            download_path: rebase(crate::cli::DEFAULT_DOWNLOAD_PATH),
        }
    }
}

/// What the agent reports about the machine it runs on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub info: HostInfo,
    pub network: Vec<NetworkStatus>,
    pub default_interface: String,
}

impl HostFacts {
    pub fn gather() -> Self {
        Self {
            info: hostinfo::host_info(),
            network: hostinfo::network_status(),
            default_interface: hostinfo::default_interface_name(),
        }
    }
}

/// A failed step and the condition reason reported for it
struct StepFailure {
    reason: &'static str,
    error: AgentError,
}

trait WithReason<T> {
    fn reason(self, reason: &'static str) -> Result<T, StepFailure>;
}

impl<T> WithReason<T> for Result<T, AgentError> {
    fn reason(self, reason: &'static str) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure { reason, error })
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn write_sentinel(path: &Path) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AgentError::io("create", parent.display(), e))?;
    }
    tokio::fs::write(path, b"")
        .await
        .map_err(|e| AgentError::io("write", path.display(), e))
}

async fn remove_sentinel(path: &Path) -> Result<(), AgentError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AgentError::io("remove", path.display(), e)),
    }
}

fn bootstrap_condition(reason: &str, severity: ConditionSeverity, message: impl Into<String>) -> Condition {
    Condition::false_condition(K8S_NODE_BOOTSTRAP_SUCCEEDED, reason, severity, message)
}

fn waiting_for_machine() -> Condition {
    bootstrap_condition(
        host_reasons::WAITING_FOR_MACHINE_REF,
        ConditionSeverity::Info,
        "",
    )
}

/// Remove everything a bind wrote into metadata and spec.
///
/// Returns `true` if the host changed.
pub fn strip_binding(host: &mut ByoHost) -> bool {
    let mut changed = false;
    if let Some(labels) = host.metadata.labels.as_mut() {
        for key in [CLUSTER_NAME_LABEL, ATTACHED_BYOMACHINE_LABEL] {
            changed |= labels.remove(key).is_some();
        }
    }
    if let Some(annotations) = host.metadata.annotations.as_mut() {
        for key in BINDING_ANNOTATIONS.iter().chain([&HOST_CLEANUP_ANNOTATION]) {
            changed |= annotations.remove(*key).is_some();
        }
    }
    changed |= host.spec.bootstrap_secret.take().is_some();
    changed |= host.spec.installation_secret.take().is_some();
    changed |= host.spec.uninstallation_script.take().is_some();
    changed
}

/// Reconciles the host record of the machine the agent runs on.
pub struct HostReconciler {
    namespace: String,
    hosts: Box<dyn ByoHostClientTrait>,
    secrets: Box<dyn SecretReader>,
    runner: Arc<dyn CommandRunner>,
    writer: FileWriter,
    paths: AgentPaths,
    skip_installation: bool,
    pub(crate) metrics: Arc<Metrics>,
    facts: fn() -> HostFacts,
}

impl std::fmt::Debug for HostReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostReconciler")
            .field("namespace", &self.namespace)
            .field("paths", &self.paths)
            .field("skip_installation", &self.skip_installation)
            .finish_non_exhaustive()
    }
}

impl HostReconciler {
    pub fn new(
        namespace: impl Into<String>,
        hosts: impl ByoHostClientTrait + 'static,
        secrets: impl SecretReader + 'static,
        runner: Arc<dyn CommandRunner>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            hosts: Box::new(hosts),
            secrets: Box::new(secrets),
            runner,
            writer: FileWriter::new(),
            paths: AgentPaths::new(crate::cli::DEFAULT_DOWNLOAD_PATH),
            skip_installation: false,
            metrics,
            facts: HostFacts::gather,
        }
    }

    pub fn with_writer(mut self, writer: FileWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_paths(mut self, paths: AgentPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_skip_installation(mut self, skip: bool) -> Self {
        self.skip_installation = skip;
        self
    }

    pub fn with_facts(mut self, facts: fn() -> HostFacts) -> Self {
        self.facts = facts;
        self
    }

    async fn local_state(&self) -> LocalState {
        LocalState {
            bootstrapped: exists(&self.paths.bootstrap_sentinel).await,
            installed: exists(&self.paths.install_sentinel).await,
            skip_installation: self.skip_installation,
        }
    }

    pub async fn reconcile(&self, host: &ByoHost) -> Result<Action, AgentError> {
        let step = plan(host, self.local_state().await);
        debug!(host = %host.name_any(), ?step, "Planned host step");

        match step {
            Step::Release => self.release(host).await,
            Step::AwaitMachine => {
                self.update_status(host, |status| {
                    set_condition(&mut status.conditions, waiting_for_machine());
                })
                .await?;
                Ok(Action::requeue(HEARTBEAT))
            }
            Step::AwaitBootstrapSecret => {
                self.update_status(host, |status| {
                    set_condition(
                        &mut status.conditions,
                        bootstrap_condition(
                            host_reasons::BOOTSTRAP_DATA_SECRET_UNAVAILABLE,
                            ConditionSeverity::Info,
                            "bootstrap data secret not referenced yet",
                        ),
                    );
                })
                .await?;
                Ok(Action::await_change())
            }
            Step::AwaitInstallationSecret => {
                self.update_status(host, |status| {
                    set_condition(
                        &mut status.conditions,
                        bootstrap_condition(
                            host_reasons::INSTALLATION_SECRET_UNAVAILABLE,
                            ConditionSeverity::Info,
                            "installation secret not referenced yet",
                        ),
                    );
                })
                .await?;
                Ok(Action::await_change())
            }
            Step::Bootstrap { install } => self.bootstrap(host, install).await,
            Step::ReportBootstrapped | Step::Steady => {
                self.update_status(host, |status| {
                    set_condition(
                        &mut status.conditions,
                        Condition::true_condition(K8S_NODE_BOOTSTRAP_SUCCEEDED),
                    );
                })
                .await?;
                Ok(Action::requeue(HEARTBEAT))
            }
        }
    }

    /// Refresh host facts, apply `mutate`, and write the status if it changed.
    async fn update_status(
        &self,
        host: &ByoHost,
        mutate: impl FnOnce(&mut ByoHostStatus),
    ) -> Result<(), AgentError> {
        let namespace = host.namespace().unwrap_or_else(|| self.namespace.clone());
        let name = host.name_any();
        let Some(fresh) = self.hosts.get_host(&namespace, &name).await? else {
            warn!("ByoHost {}/{} disappeared, skipping status update", namespace, name);
            return Ok(());
        };

        let current = fresh.status.unwrap_or_default();
        let facts = (self.facts)();
        let mut status = current.clone();
        status.host_details = Some(facts.info);
        status.network = facts.network;
        mutate(&mut status);

        if status == current {
            return Ok(());
        }
        self.hosts.patch_host_status(&namespace, &name, &status).await?;
        debug!("Updated status of ByoHost {}/{}", namespace, name);
        Ok(())
    }

    async fn read_secret(
        &self,
        reference: &SecretReference,
        default_ns: &str,
        key: &str,
    ) -> Result<String, AgentError> {
        let namespace = reference.namespace_or(default_ns);
        let qualified = format!("{}/{}", namespace, reference.name);
        let data = self
            .secrets
            .read(namespace, &reference.name)
            .await?
            .ok_or_else(|| AgentError::SecretUnavailable(qualified.clone()))?;
        text_value(&data, key, &qualified)
    }

    /// Script with the bundle download path filled in. Creates the directory.
    async fn prepare_script(&self, script: &str) -> Result<String, AgentError> {
        let dir = &self.paths.download_path;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AgentError::io("create", dir.display(), e))?;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(BUNDLE_DIR_MODE))
            .await
            .map_err(|e| AgentError::io("chmod", dir.display(), e))?;
        Ok(installer::with_download_path(script, &dir.display().to_string()))
    }

    async fn install(&self, script: &str) -> Result<(), AgentError> {
        let script = self.prepare_script(script).await?;
        info!("Installing Kubernetes components");
        self.runner
            .run(&RunCommand::Shell(script))
            .await
            .map_err(|source| AgentError::Script {
                script: "install",
                source,
            })?;
        write_sentinel(&self.paths.install_sentinel).await
    }

    async fn run_bootstrap(&self, host: &ByoHost, install: bool) -> Result<(), StepFailure> {
        let namespace = host.namespace().unwrap_or_else(|| self.namespace.clone());

        if install {
            let reference = host
                .spec
                .installation_secret
                .as_ref()
                .ok_or_else(|| AgentError::SecretUnavailable("installation secret".to_string()))
                .reason(host_reasons::INSTALLATION_SECRET_UNAVAILABLE)?;
            let script = self
                .read_secret(reference, &namespace, INSTALL_SCRIPT_KEY)
                .await
                .reason(host_reasons::INSTALLATION_SECRET_UNAVAILABLE)?;
            self.install(&script)
                .await
                .reason(host_reasons::K8S_COMPONENTS_INSTALLATION_FAILED)?;
        }

        let reference = host
            .spec
            .bootstrap_secret
            .as_ref()
            .ok_or_else(|| AgentError::SecretUnavailable("bootstrap data secret".to_string()))
            .reason(host_reasons::BOOTSTRAP_DATA_SECRET_UNAVAILABLE)?;
        let document = self
            .read_secret(reference, &namespace, SECRET_VALUE_KEY)
            .await
            .reason(host_reasons::BOOTSTRAP_DATA_SECRET_UNAVAILABLE)?;

        let executor = ScriptExecutor::new(
            self.writer.clone(),
            self.runner.clone(),
            TemplateContext {
                default_network_interface_name: (self.facts)().default_interface,
            },
        );
        info!("Bootstrapping Kubernetes node");
        executor
            .execute(&document)
            .await
            .map_err(AgentError::Bootstrap)
            .reason(host_reasons::CLOUDINIT_EXECUTION_FAILED)?;

        write_sentinel(&self.paths.bootstrap_sentinel)
            .await
            .map_err(|e| AgentError::Fatal(format!("cannot record bootstrap success: {}", e)))
            .reason(host_reasons::CLOUDINIT_EXECUTION_FAILED)
    }

    async fn bootstrap(&self, host: &ByoHost, install: bool) -> Result<Action, AgentError> {
        self.metrics.bootstrap_started();
        match self.run_bootstrap(host, install).await {
            Ok(()) => {
                self.update_status(host, |status| {
                    set_condition(
                        &mut status.conditions,
                        Condition::true_condition(K8S_NODE_BOOTSTRAP_SUCCEEDED),
                    );
                })
                .await?;
                info!("Node bootstrapped");
                Ok(Action::requeue(HEARTBEAT))
            }
            Err(StepFailure { reason, error }) => {
                self.metrics.bootstrap_failed();
                if !error.is_fatal() {
                    let message = error.to_string();
                    self.update_status(host, |status| {
                        set_condition(
                            &mut status.conditions,
                            bootstrap_condition(reason, ConditionSeverity::Warning, message),
                        );
                    })
                    .await?;
                }
                Err(error)
            }
        }
    }

    /// Uninstall script when the control plane provided one, `kubeadm reset` otherwise.
    async fn reset_node(&self, host: &ByoHost) -> Result<(), AgentError> {
        let uninstall = host
            .spec
            .uninstallation_script
            .as_deref()
            .filter(|script| !script.trim().is_empty() && !self.skip_installation);
        let (script, command) = match uninstall {
            Some(script) => ("uninstall", RunCommand::Shell(self.prepare_script(script).await?)),
            None => (
                "reset",
                RunCommand::Argv(
                    ["kubeadm", "reset", "--force"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
            ),
        };
        info!(script, "Cleaning up Kubernetes node");
        self.runner
            .run(&command)
            .await
            .map_err(|source| AgentError::Script { script, source })
    }

    /// Tear the node down and hand the host back to the pool.
    ///
    /// The status goes first: once the machine reference is gone the host
    /// still carries the cleanup annotation, so no binder can pick it up
    /// before the metadata is cleared too.
    async fn release(&self, host: &ByoHost) -> Result<Action, AgentError> {
        let local = self.local_state().await;
        if host.is_bound() || local.bootstrapped || local.installed {
            self.metrics.cleanup_started();
            if let Err(e) = self.reset_node(host).await {
                self.metrics.cleanup_failed();
                let message = e.to_string();
                self.update_status(host, |status| {
                    set_condition(
                        &mut status.conditions,
                        bootstrap_condition(
                            host_reasons::CLEAN_K8S_NODE_FAILED,
                            ConditionSeverity::Warning,
                            message,
                        ),
                    );
                })
                .await?;
                return Err(e);
            }
            remove_sentinel(&self.paths.bootstrap_sentinel).await?;
            remove_sentinel(&self.paths.install_sentinel).await?;
        }

        self.update_status(host, |status| {
            status.machine_ref = None;
            status
                .conditions
                .retain(|c| c.type_ == K8S_NODE_BOOTSTRAP_SUCCEEDED);
            set_condition(&mut status.conditions, waiting_for_machine());
        })
        .await?;
        self.clear_binding(host).await?;
        info!("Released ByoHost {}", host.name_any());
        Ok(Action::requeue(HEARTBEAT))
    }

    async fn clear_binding(&self, host: &ByoHost) -> Result<(), AgentError> {
        let namespace = host.namespace().unwrap_or_else(|| self.namespace.clone());
        let name = host.name_any();
        for attempt in 1..=MAX_RELEASE_ATTEMPTS {
            let Some(mut current) = self.hosts.get_host(&namespace, &name).await? else {
                return Ok(());
            };
            if !strip_binding(&mut current) {
                return Ok(());
            }
            match self.hosts.replace_host(&current).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => debug!(
                    "Conflict clearing binding of ByoHost {}/{} (attempt {}/{})",
                    namespace, name, attempt, MAX_RELEASE_ATTEMPTS
                ),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ByohClientError::Conflict(format!(
            "could not clear binding of ByoHost {}/{} after {} attempts",
            namespace, name, MAX_RELEASE_ATTEMPTS
        ))
        .into())
    }
}
