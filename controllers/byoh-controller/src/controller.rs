//! Main controller implementation.
//!
//! The `Controller` struct owns one task per watched kind plus the metrics
//! and webhook servers. The manager runs until any of them stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use byoh_client::ByoHostClient;
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ManagerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::metrics::{self, Metrics, ProbeState};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crate::webhook::{self, WebhookState};

type Task = JoinHandle<Result<(), ControllerError>>;

/// BYOH controller manager.
pub struct Controller {
    byo_machine_watcher: Task,
    byo_cluster_watcher: Task,
    installer_config_watcher: Task,
    csr_watcher: Task,
    bootstrap_kubeconfig_watcher: Task,
    metrics_server: Task,
    webhook_server: Task,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ManagerConfig) -> Result<Self, ControllerError> {
        info!("Initializing BYOH controller manager");

        let kube_client = Client::try_default().await?;

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::Server(format!("metrics registry: {}", e)))?,
        );
        let ready = Arc::new(AtomicBool::new(false));
        let probe_state = ProbeState {
            metrics: metrics.clone(),
            ready: ready.clone(),
        };
        let metrics_addr = config.metrics_bind_address;
        let metrics_server = tokio::spawn(async move { metrics::serve(metrics_addr, probe_state).await });

        let webhook_state = Arc::new(WebhookState {
            manager_service_account: config.manager_service_account.clone(),
        });
        let webhook_addr = config.webhook_bind_address;
        let cert_dir = config.webhook_cert_dir.clone();
        let webhook_server =
            tokio::spawn(async move { webhook::serve(webhook_addr, &cert_dir, webhook_state).await });

        let namespace = config.namespace.clone();
        let reconciler = Arc::new(Reconciler::new(
            kube_client.clone(),
            ByoHostClient::new(kube_client.clone()),
            KubeEventPublisher::new(kube_client.clone()),
            metrics,
            config,
        ));

        let watcher = Arc::new(Watcher::new(reconciler, kube_client, namespace));

        let byo_machine_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_byo_machines().await })
        };
        let byo_cluster_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_byo_clusters().await })
        };
        let installer_config_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_installer_configs().await })
        };
        let csr_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_csrs().await })
        };
        let bootstrap_kubeconfig_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_bootstrap_kubeconfigs().await })
        };

        ready.store(true, Ordering::Relaxed);
        info!("All watchers started");

        Ok(Self {
            byo_machine_watcher,
            byo_cluster_watcher,
            installer_config_watcher,
            csr_watcher,
            bootstrap_kubeconfig_watcher,
            metrics_server,
            webhook_server,
        })
    }

    /// Runs until one of the tasks exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("BYOH controller manager running");

        let (name, result) = tokio::select! {
            r = &mut self.byo_machine_watcher => ("ByoMachine watcher", r),
            r = &mut self.byo_cluster_watcher => ("ByoCluster watcher", r),
            r = &mut self.installer_config_watcher => ("K8sInstallerConfig watcher", r),
            r = &mut self.csr_watcher => ("CSR watcher", r),
            r = &mut self.bootstrap_kubeconfig_watcher => ("BootstrapKubeconfig watcher", r),
            r = &mut self.metrics_server => ("metrics server", r),
            r = &mut self.webhook_server => ("webhook server", r),
        };

        match result {
            Ok(Ok(())) => {
                info!("{} stopped", name);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("{} error: {}", name, e);
                Err(ControllerError::Watch(format!("{} error: {}", name, e)))
            }
            Err(e) => {
                error!("{} panicked: {}", name, e);
                Err(ControllerError::Watch(format!("{} panicked: {}", name, e)))
            }
        }
    }
}
