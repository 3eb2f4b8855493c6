//! BYOH Host Agent
//!
//! Runs on every bring-your-own host:
//! - obtains and rotates a client certificate for `byoh:host:<hostname>`
//! - registers the host record and reports platform details
//! - bootstraps the node when a machine is bound and cleans it up on release

mod agent;
mod backoff;
mod cli;
mod error;
mod hostinfo;
mod identity;
mod metrics;
mod reconciler;
mod registration;
mod secrets;
mod watcher;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::agent::{Agent, Exit};
use crate::backoff::ExponentialBackoff;
use crate::cli::{AgentSettings, Args, log_directive};
use crate::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_directive(args.verbosity))),
        )
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let settings = Arc::new(AgentSettings::from_args(args).context("invalid agent configuration")?);
    info!("Starting BYOH host agent");
    info!("  Host: {}/{}", settings.namespace, settings.hostname);
    info!("  Kubeconfig: {}", settings.kubeconfig.display());
    info!("  Download path: {}", settings.download_path.display());
    info!("  Skip installation: {}", settings.skip_installation);
    info!("  Metrics: {}", settings.metrics_bind_address);

    let metrics = Arc::new(Metrics::new().context("metrics registry")?);
    let mut backoff = ExponentialBackoff::default();

    loop {
        let run = async {
            let client = identity::ensure_identity(&settings).await?;
            Agent::start(settings.clone(), client, metrics.clone())
                .await?
                .run()
                .await
        };
        match run.await {
            Ok(Exit::Rotated) => backoff.reset(),
            Ok(Exit::Stopped) => {
                info!("Host agent stopped");
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_backoff();
                warn!("Host agent failed, restarting in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e).context("host agent failed"),
        }
    }
}
