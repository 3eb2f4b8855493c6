//! Kubernetes resource watchers.
//!
//! Every kind runs through the generic `watch_resource()` helper on top of
//! `kube_runtime::Controller`, which handles reconnection and queueing. The
//! error policy retries transient failures with a per-object Fibonacci
//! backoff and leaves permanent ones until the object changes.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crds::{BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, K8sInstallerConfig};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::byo_machine::machine_for_host;

/// Quiet period after the last event before reconciling
const RECONCILE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Requeue for errors that retrying will not fix
const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn resource_key<K: Resource>(kind: &str, obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}/{}", kind, ns, obj.name_any()),
        None => format!("{}/{}", kind, obj.name_any()),
    }
}

/// Requeue decision for a failed reconcile.
fn requeue_for_error(error: &ControllerError, backoff: impl FnOnce() -> (u64, u32)) -> Duration {
    if let Some(delay) = error.requeue_after() {
        return delay;
    }
    if error.is_transient() {
        Duration::from_secs(backoff().0)
    } else {
        PERMANENT_ERROR_REQUEUE
    }
}

/// Run `controller` until its stream ends, reconciling with `reconcile_fn`.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + Debug + DeserializeOwned + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher (concurrency {})", resource_name, concurrency);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(resource_name, obj.as_ref());
        let delay = requeue_for_error(error, || ctx.get_backoff_for_resource(&key));
        if error.requeue_after().is_some() {
            info!("{} waiting, retry in {:?}: {}", key, delay, error);
        } else if error.is_transient() {
            warn!("{} failed, retry in {:?}: {}", key, delay, error);
        } else {
            error!("{} failed permanently, retry in {:?}: {}", key, delay, error);
        }
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(resource_name, obj.as_ref());
            debug!("Reconciling {}", key);
            ctx.metrics.reconciled(resource_name);
            match reconcile_fn(ctx.clone(), obj).await {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) => {
                    ctx.metrics.failed(resource_name);
                    Err(e)
                }
            }
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(RECONCILE_DEBOUNCE)
        .concurrency(concurrency);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("{} controller event: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the BYOH resources and feeds them to the reconciler.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: Option<String>) -> Self {
        Self {
            reconciler,
            client,
            namespace,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub async fn watch_byo_machines(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ByoMachine>(), watcher::Config::default())
            .owns(self.api::<K8sInstallerConfig>(), watcher::Config::default())
            .watches(self.api::<ByoHost>(), watcher::Config::default(), |host| {
                machine_for_host(&host)
            });
        watch_resource(
            controller,
            self.reconciler.clone(),
            |r, machine| Box::pin(async move { r.reconcile_byo_machine(machine).await }),
            "ByoMachine",
            self.reconciler.config.concurrency.byo_machine,
        )
        .await
    }

    pub async fn watch_byo_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ByoCluster>(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |r, cluster| Box::pin(async move { r.reconcile_byo_cluster(cluster).await }),
            "ByoCluster",
            self.reconciler.config.concurrency.byo_cluster,
        )
        .await
    }

    pub async fn watch_installer_configs(&self) -> Result<(), ControllerError> {
        let controller =
            Controller::new(self.api::<K8sInstallerConfig>(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |r, config| Box::pin(async move { r.reconcile_installer_config(config).await }),
            "K8sInstallerConfig",
            self.reconciler.config.concurrency.installer_config,
        )
        .await
    }

    pub async fn watch_csrs(&self) -> Result<(), ControllerError> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let controller = Controller::new(api, watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |r, csr| Box::pin(async move { r.reconcile_csr(&csr).await }),
            "CertificateSigningRequest",
            self.reconciler.config.concurrency.csr,
        )
        .await
    }

    pub async fn watch_bootstrap_kubeconfigs(&self) -> Result<(), ControllerError> {
        let controller =
            Controller::new(self.api::<BootstrapKubeconfig>(), watcher::Config::default());
        watch_resource(
            controller,
            self.reconciler.clone(),
            |r, bootstrap| {
                Box::pin(async move { r.reconcile_bootstrap_kubeconfig(&bootstrap).await })
            },
            "BootstrapKubeconfig",
            self.reconciler.config.concurrency.bootstrap_kubeconfig,
        )
        .await
    }
}
