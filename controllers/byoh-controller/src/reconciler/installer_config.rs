//! K8sInstallerConfig reconciler
//!
//! Once the owning ByoMachine has a host, renders the install and uninstall
//! scripts for the host's platform into a Secret named after the config.

use std::collections::BTreeMap;
use std::sync::Arc;

use crds::capi::strip_build_metadata;
use crds::machine_reasons::INSTALLATION_NOT_SUPPORTED;
use crds::{
    BUNDLE_LOOKUP_TAG_ANNOTATION, ByoHost, ConditionSeverity, INFRASTRUCTURE_GROUP, INSTALL_SCRIPT_KEY,
    K8S_INSTALLER_CONFIG_FINALIZER, K8S_VERSION_ANNOTATION, K8sInstallerConfig,
    K8sInstallerConfigStatus, READY_CONDITION, SecretReference, UNINSTALL_SCRIPT_KEY, mark_false,
    mark_true,
};
use installer::{DEFAULT_BUNDLE_TAG, InstallRequest, InstallerError, InstallerScripts};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use serde_json::json;
use tracing::{debug, info, warn};

use super::Reconciler;
use super::byo_machine::WAIT_REQUEUE;
use super::host_matcher;
use crate::error::ControllerError;
use crate::events::{actions, reasons};

/// Name of the ByoMachine owning an installer config.
pub fn owner_machine(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| {
                r.kind == "ByoMachine"
                    && r.api_version.starts_with(&format!("{}/", INFRASTRUCTURE_GROUP))
            })
            .map(|r| r.name.as_str())
    })
}

/// Script inputs for `host`, or `None` while the host lacks platform details
/// or a target version.
pub fn install_request<'a>(
    host: &'a ByoHost,
    config: &'a K8sInstallerConfig,
) -> Option<InstallRequest<'a>> {
    let details = host.status.as_ref()?.host_details.as_ref()?;
    let annotations = host.metadata.annotations.as_ref()?;
    let version = annotations
        .get(K8S_VERSION_ANNOTATION)
        .map(|v| strip_build_metadata(v))
        .filter(|v| !v.is_empty())?;
    let tag = annotations
        .get(BUNDLE_LOOKUP_TAG_ANNOTATION)
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_BUNDLE_TAG);
    Some(InstallRequest {
        os_image: &details.os_image,
        arch: &details.architecture,
        k8s_version: version,
        bundle_repo: &config.spec.bundle_repo,
        bundle_tag: tag,
    })
}

/// Secret holding the scripts, owned by the installer config.
pub fn installation_secret(
    config: &K8sInstallerConfig,
    scripts: &InstallerScripts,
) -> Result<Secret, ControllerError> {
    let owner = config.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidConfig(format!(
            "K8sInstallerConfig {} has no uid to own its secret",
            config.name_any()
        ))
    })?;
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(config.name_any()),
            namespace: config.namespace(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([
            (
                INSTALL_SCRIPT_KEY.to_string(),
                ByteString(scripts.install.clone().into_bytes()),
            ),
            (
                UNINSTALL_SCRIPT_KEY.to_string(),
                ByteString(scripts.uninstall.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    })
}

fn is_owned_by(secret: &Secret, config: &K8sInstallerConfig) -> bool {
    let Some(uid) = config.uid() else {
        return false;
    };
    secret.owner_references().iter().any(|r| r.uid == uid)
}

impl Reconciler {
    pub async fn reconcile_installer_config(
        &self,
        config: Arc<K8sInstallerConfig>,
    ) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<K8sInstallerConfig> = self.namespaced(&namespace);

        finalizer(&api, K8S_INSTALLER_CONFIG_FINALIZER, config, |event| async move {
            match event {
                FinalizerEvent::Apply(config) => self.apply_installer_config(&config).await,
                FinalizerEvent::Cleanup(config) => self.cleanup_installer_config(&config).await,
            }
        })
        .await
        .map_err(ControllerError::from)
    }

    pub(crate) async fn apply_installer_config(
        &self,
        config: &K8sInstallerConfig,
    ) -> Result<Action, ControllerError> {
        let name = config.name_any();
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        info!("Reconciling K8sInstallerConfig {}/{}", namespace, name);

        let secrets: Api<Secret> = self.namespaced(&namespace);
        if config.is_ready() && secrets.get_opt(&name).await?.is_some() {
            debug!("K8sInstallerConfig {}/{} is ready", namespace, name);
            return Ok(Action::await_change());
        }

        let Some(machine_name) = owner_machine(&config.metadata) else {
            info!(
                "K8sInstallerConfig {}/{} has no owning ByoMachine yet, waiting",
                namespace, name
            );
            return Ok(Action::await_change());
        };
        let Some(host) =
            host_matcher::find_attached(self.host_client.as_ref(), &namespace, machine_name).await?
        else {
            debug!("ByoMachine {}/{} has no host yet", namespace, machine_name);
            return Ok(Action::requeue(WAIT_REQUEUE));
        };
        let Some(request) = install_request(&host, config) else {
            debug!(
                "ByoHost {}/{} lacks platform details or a target version",
                namespace,
                host.name_any()
            );
            return Ok(Action::requeue(WAIT_REQUEUE));
        };

        let mut status = config.status.clone().unwrap_or_default();
        let scripts = match self.installers.scripts(&request) {
            Ok(scripts) => scripts,
            Err(e @ InstallerError::Unsupported { .. }) => {
                warn!("K8sInstallerConfig {}/{}: {}", namespace, name, e);
                status.ready = false;
                mark_false(
                    &mut status.conditions,
                    READY_CONDITION,
                    INSTALLATION_NOT_SUPPORTED,
                    ConditionSeverity::Error,
                    e.to_string(),
                );
                self.write_installer_status(config, status).await?;
                self.publish(
                    config,
                    EventType::Warning,
                    reasons::INSTALLATION_NOT_SUPPORTED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e.into()),
        };

        let secret = installation_secret(config, &scripts)?;
        self.apply_installation_secret(&secrets, secret, config).await?;

        status.ready = true;
        status.installation_secret = Some(SecretReference::new(&name, &namespace));
        mark_true(&mut status.conditions, READY_CONDITION);
        self.write_installer_status(config, status).await?;
        Ok(Action::await_change())
    }

    async fn apply_installation_secret(
        &self,
        secrets: &Api<Secret>,
        secret: Secret,
        config: &K8sInstallerConfig,
    ) -> Result<(), ControllerError> {
        let name = secret.name_any();
        match secrets.get_opt(&name).await? {
            None => {
                secrets.create(&PostParams::default(), &secret).await?;
                info!("Created installation secret {}", name);
                self.publish(
                    config,
                    EventType::Normal,
                    reasons::INSTALLATION_SECRET_CREATED,
                    actions::RECONCILE,
                    None,
                )
                .await;
                Ok(())
            }
            Some(existing) if is_owned_by(&existing, config) => {
                if existing.data != secret.data {
                    secrets
                        .patch(
                            &name,
                            &PatchParams::default(),
                            &Patch::Merge(&json!({ "data": secret.data })),
                        )
                        .await?;
                    info!("Updated installation secret {}", name);
                }
                Ok(())
            }
            Some(_) => Err(ControllerError::InvalidConfig(format!(
                "secret {} exists and is not owned by K8sInstallerConfig {}",
                name,
                config.name_any()
            ))),
        }
    }

    pub(crate) async fn cleanup_installer_config(
        &self,
        config: &K8sInstallerConfig,
    ) -> Result<Action, ControllerError> {
        let name = config.name_any();
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        let secrets: Api<Secret> = self.namespaced(&namespace);

        match secrets.get_opt(&name).await? {
            Some(secret) if is_owned_by(&secret, config) => {
                info!("Deleting installation secret {}/{}", namespace, name);
                match secrets.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
                Err(ControllerError::DeletionBlocked(format!(
                    "waiting for installation secret {}/{} to be removed",
                    namespace, name
                )))
            }
            _ => Ok(Action::await_change()),
        }
    }

    async fn write_installer_status(
        &self,
        config: &K8sInstallerConfig,
        status: K8sInstallerConfigStatus,
    ) -> Result<(), ControllerError> {
        if config.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        self.namespaced::<K8sInstallerConfig>(&namespace)
            .patch_status(
                &config.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&json!({ "status": status })),
            )
            .await?;
        Ok(())
    }
}
