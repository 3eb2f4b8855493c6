//! BYOH Controller Manager
//!
//! Cluster API infrastructure provider for bring-your-own hosts:
//! - ByoMachine: binds machines to registered hosts and sets provider IDs
//! - ByoCluster: endpoint defaulting and guarded deletion
//! - K8sInstallerConfig: per-host install/uninstall scripts
//! - CertificateSigningRequest: approval of host agent identities
//! - BootstrapKubeconfig: bootstrap tokens for new hosts
//! - ByoHost admission webhook

mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod reconciler;
mod remote;
mod watcher;
mod webhook;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ManagerConfig;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting BYOH controller manager");

    let config = ManagerConfig::from_env()?;
    info!("Configuration:");
    info!(
        "  Namespace: {}",
        config.namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Metrics: {}", config.metrics_bind_address);
    info!("  Webhook: {}", config.webhook_bind_address);
    info!("  Bootstrap token TTL: {:?}", config.bootstrap_token_ttl);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
