//! Agent identity.
//!
//! The agent authenticates as `byoh:host:<hostname>` with a client
//! certificate. The first start trades the bootstrap token for a certificate
//! through a CertificateSigningRequest and keeps it in the persistent
//! kubeconfig. The certificate is renewed with the agent's own identity once
//! it enters the rotation window.

pub mod csr;
pub mod kubeconfig;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{info, warn};

use crate::cli::AgentSettings;
use crate::error::AgentError;

/// Upper bound between two certificate expiry checks
const MAX_ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(3600);
const MIN_ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

fn read(path: &Path) -> Result<String, AgentError> {
    std::fs::read_to_string(path).map_err(|e| AgentError::io("read", path.display(), e))
}

/// Client for the kubeconfig at `path`.
pub async fn load_client(path: &Path) -> Result<Client, AgentError> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

/// Expiry (Unix seconds) of the client certificate in the kubeconfig at `path`.
pub fn certificate_expiry(path: &Path) -> Result<i64, AgentError> {
    let cert = kubeconfig::client_certificate(&read(path)?)?;
    kubeconfig::certificate_not_after(&cert)
}

/// Request a certificate with `requester` and write the persistent kubeconfig,
/// pointing at the cluster described in `endpoint_source`.
async fn issue(
    settings: &AgentSettings,
    requester: Client,
    endpoint_source: &Path,
) -> Result<(), AgentError> {
    let endpoint = kubeconfig::cluster_endpoint(&read(endpoint_source)?)?;
    let (cert, key) = csr::request_certificate(
        requester,
        &settings.hostname,
        settings.cert_expiry,
        settings.csr_approval_timeout,
    )
    .await?;
    let rendered = kubeconfig::render(&endpoint, &settings.namespace, &cert, &key)?;
    kubeconfig::write_atomic(&settings.kubeconfig, rendered.as_bytes())
        .map_err(|e| AgentError::Fatal(format!("cannot write kubeconfig: {}", e)))?;
    info!("Wrote kubeconfig {}", settings.kubeconfig.display());
    Ok(())
}

/// Make sure a usable persistent kubeconfig exists and return its client.
pub async fn ensure_identity(settings: &AgentSettings) -> Result<Client, AgentError> {
    let path = &settings.kubeconfig;
    if path.exists() {
        match certificate_expiry(path) {
            Ok(not_after) if !kubeconfig::needs_rotation(not_after, now_unix(), settings.cert_rotation_window) => {
                info!("Using existing kubeconfig {}", path.display());
                return load_client(path).await;
            }
            Ok(not_after) if not_after > now_unix() => {
                info!("Client certificate expires soon, renewing");
                let current = load_client(path).await?;
                issue(settings, current, path).await?;
                return load_client(path).await;
            }
            Ok(_) => warn!("Client certificate in {} has expired", path.display()),
            Err(e) => warn!(error = %e, "Cannot use kubeconfig {}", path.display()),
        }
    }

    let bootstrap = settings.bootstrap_kubeconfig.as_deref().ok_or_else(|| {
        AgentError::Config(format!(
            "no usable kubeconfig at {} and no --bootstrap-kubeconfig given",
            path.display()
        ))
    })?;
    info!("Requesting host identity with bootstrap kubeconfig {}", bootstrap.display());
    let requester = load_client(bootstrap).await?;
    issue(settings, requester, bootstrap).await?;
    load_client(path).await
}

/// Delay before the certificate expiring at `not_after` should be checked again.
pub fn next_rotation_check(not_after: i64, now: i64, window: Duration) -> Duration {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    let until = not_after.saturating_sub(window).saturating_sub(now);
    Duration::from_secs(u64::try_from(until).unwrap_or(0))
        .clamp(MIN_ROTATION_CHECK_INTERVAL, MAX_ROTATION_CHECK_INTERVAL)
}

/// Wait until the client certificate needs renewing, renew it, and return.
///
/// The caller rebuilds its clients from the new kubeconfig afterwards.
pub async fn rotate_when_due(settings: &AgentSettings) -> Result<(), AgentError> {
    loop {
        let not_after = certificate_expiry(&settings.kubeconfig)?;
        let now = now_unix();
        if kubeconfig::needs_rotation(not_after, now, settings.cert_rotation_window) {
            info!("Rotating client certificate");
            let current = load_client(&settings.kubeconfig).await?;
            return issue(settings, current, &settings.kubeconfig).await;
        }
        tokio::time::sleep(next_rotation_check(not_after, now, settings.cert_rotation_window)).await;
    }
}
