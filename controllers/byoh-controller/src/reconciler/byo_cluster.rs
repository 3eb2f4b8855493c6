//! ByoCluster reconciler
//!
//! Defaults the control-plane port, reports the infrastructure ready, and on
//! deletion waits for every ByoMachine of the cluster to go away before
//! dropping the cached workload cluster client.

use std::sync::Arc;

use crds::capi::{Cluster, owner_cluster_name};
use crds::{
    BYOCLUSTER_FINALIZER, ByoCluster, ByoClusterSpec, ByoClusterStatus, ByoMachine,
    CLUSTER_NAME_LABEL, DEFAULT_API_SERVER_PORT, READY_CONDITION, mark_true,
};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{actions, reasons};

/// Merge patch defaulting an unset control-plane port.
pub fn endpoint_patch(spec: &ByoClusterSpec) -> Option<Value> {
    (spec.control_plane_endpoint.port == 0).then(|| {
        json!({"spec": {"controlPlaneEndpoint": {"port": DEFAULT_API_SERVER_PORT}}})
    })
}

pub fn desired_status(current: Option<&ByoClusterStatus>) -> ByoClusterStatus {
    let mut status = current.cloned().unwrap_or_default();
    status.ready = true;
    mark_true(&mut status.conditions, READY_CONDITION);
    status
}

/// Name machines of this cluster carry in their cluster label.
pub fn cluster_name_of(byo_cluster: &ByoCluster) -> String {
    owner_cluster_name(&byo_cluster.metadata)
        .map(str::to_string)
        .or_else(|| byo_cluster.labels().get(CLUSTER_NAME_LABEL).cloned())
        .unwrap_or_else(|| byo_cluster.name_any())
}

impl Reconciler {
    pub async fn reconcile_byo_cluster(
        &self,
        byo_cluster: Arc<ByoCluster>,
    ) -> Result<Action, ControllerError> {
        let namespace = byo_cluster.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<ByoCluster> = self.namespaced(&namespace);

        finalizer(&api, BYOCLUSTER_FINALIZER, byo_cluster, |event| async move {
            match event {
                FinalizerEvent::Apply(bc) => self.apply_byo_cluster(&bc).await,
                FinalizerEvent::Cleanup(bc) => self.cleanup_byo_cluster(&bc).await,
            }
        })
        .await
        .map_err(ControllerError::from)
    }

    async fn apply_byo_cluster(&self, byo_cluster: &ByoCluster) -> Result<Action, ControllerError> {
        let name = byo_cluster.name_any();
        let namespace = byo_cluster.namespace().unwrap_or_else(|| "default".to_string());
        info!("Reconciling ByoCluster {}/{}", namespace, name);

        let Some(cluster_name) = owner_cluster_name(&byo_cluster.metadata) else {
            info!(
                "ByoCluster {}/{} has no owning Cluster yet, waiting",
                namespace, name
            );
            return Ok(Action::await_change());
        };
        if let Some(cluster) = self
            .namespaced::<Cluster>(&namespace)
            .get_opt(cluster_name)
            .await?
        {
            if cluster.spec.paused {
                debug!("Cluster {}/{} is paused", namespace, cluster_name);
                return Ok(Action::await_change());
            }
        }

        let api: Api<ByoCluster> = self.namespaced(&namespace);
        if let Some(patch) = endpoint_patch(&byo_cluster.spec) {
            info!(
                "Defaulting control-plane port of ByoCluster {}/{} to {}",
                namespace, name, DEFAULT_API_SERVER_PORT
            );
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        let status = desired_status(byo_cluster.status.as_ref());
        if byo_cluster.status.as_ref() != Some(&status) {
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({ "status": status })),
            )
            .await?;
        }
        Ok(Action::await_change())
    }

    async fn cleanup_byo_cluster(&self, byo_cluster: &ByoCluster) -> Result<Action, ControllerError> {
        let name = byo_cluster.name_any();
        let namespace = byo_cluster.namespace().unwrap_or_else(|| "default".to_string());
        let cluster_name = cluster_name_of(byo_cluster);

        let selector = format!("{}={}", CLUSTER_NAME_LABEL, cluster_name);
        let machines = self
            .namespaced::<ByoMachine>(&namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        if !machines.items.is_empty() {
            let names: Vec<String> = machines.items.iter().map(|m| m.name_any()).collect();
            info!(
                "ByoCluster {}/{} deletion waits for ByoMachines: {}",
                namespace,
                name,
                names.join(", ")
            );
            self.publish(
                byo_cluster,
                EventType::Normal,
                reasons::DELETION_BLOCKED,
                actions::DELETE,
                Some(format!("{} ByoMachine(s) remain", names.len())),
            )
            .await;
            return Err(ControllerError::DeletionBlocked(format!(
                "ByoCluster {}/{} still has {} ByoMachine(s)",
                namespace,
                name,
                names.len()
            )));
        }

        self.tracker.evict(&namespace, &cluster_name).await;
        info!("ByoCluster {}/{} released", namespace, name);
        Ok(Action::await_change())
    }
}
