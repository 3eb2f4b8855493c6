//! Host agent runtime.
//!
//! One run owns the host watch, the metrics server and the certificate
//! rotation task for a single client identity. [`Agent::run`] returns
//! [`Exit::Rotated`] once a new certificate is in place so the caller can
//! start over with fresh clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use byoh_client::ByoHostClient;
use cloudinit::{FileWriter, ProcessRunner};
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cli::AgentSettings;
use crate::error::AgentError;
use crate::identity;
use crate::metrics::{self, Metrics, ProbeState};
use crate::reconciler::{AgentPaths, HostReconciler};
use crate::registration;
use crate::secrets::KubeSecretReader;
use crate::watcher::{self, HostContext};

type Task = JoinHandle<Result<(), AgentError>>;

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The client certificate was renewed
    Rotated,
    /// The host watch ended
    Stopped,
}

pub struct Agent {
    host_watcher: Task,
    cert_rotation: Task,
    metrics_server: Task,
}

impl Agent {
    /// Register the host and start the agent tasks with `client`.
    pub async fn start(
        settings: Arc<AgentSettings>,
        client: Client,
        metrics: Arc<Metrics>,
    ) -> Result<Self, AgentError> {
        let hosts = ByoHostClient::new(client.clone());
        registration::register(&hosts, &settings.namespace, &settings.hostname, &settings.labels)
            .await?;

        let ready = Arc::new(AtomicBool::new(false));
        let probe_state = ProbeState {
            metrics: metrics.clone(),
            ready: ready.clone(),
        };
        let metrics_addr = settings.metrics_bind_address;
        let metrics_server = tokio::spawn(async move { metrics::serve(metrics_addr, probe_state).await });

        let reconciler = HostReconciler::new(
            settings.namespace.clone(),
            hosts,
            KubeSecretReader::new(client.clone()),
            Arc::new(ProcessRunner::new()),
            metrics,
        )
        .with_writer(FileWriter::new())
        .with_paths(AgentPaths::new(settings.download_path.clone()))
        .with_skip_installation(settings.skip_installation);
        let ctx = Arc::new(HostContext::new(reconciler));

        let host_watcher = {
            let settings = settings.clone();
            tokio::spawn(async move {
                watcher::watch_host(client, &settings.namespace, &settings.hostname, ctx).await
            })
        };
        let cert_rotation = {
            let settings = settings.clone();
            tokio::spawn(async move { identity::rotate_when_due(&settings).await })
        };

        ready.store(true, Ordering::Relaxed);
        info!("Host agent started for {}/{}", settings.namespace, settings.hostname);

        Ok(Self {
            host_watcher,
            cert_rotation,
            metrics_server,
        })
    }

    /// Runs until one of the tasks exits, then stops the others.
    pub async fn run(mut self) -> Result<Exit, AgentError> {
        let (name, result) = tokio::select! {
            r = &mut self.host_watcher => ("host watcher", r),
            r = &mut self.cert_rotation => ("certificate rotation", r),
            r = &mut self.metrics_server => ("metrics server", r),
        };
        let rotated = name == "certificate rotation";

        self.host_watcher.abort();
        self.cert_rotation.abort();
        self.metrics_server.abort();

        match result {
            Ok(Ok(())) if rotated => {
                info!("Client certificate renewed, restarting with the new identity");
                Ok(Exit::Rotated)
            }
            Ok(Ok(())) => {
                info!("{} stopped", name);
                Ok(Exit::Stopped)
            }
            Ok(Err(e)) => {
                error!("{} error: {}", name, e);
                Err(e)
            }
            Err(e) => {
                error!("{} panicked: {}", name, e);
                Err(AgentError::Fatal(format!("{} panicked: {}", name, e)))
            }
        }
    }
}
