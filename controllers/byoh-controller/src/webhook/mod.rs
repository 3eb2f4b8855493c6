//! Admission webhooks served over TLS.
//!
//! Certificates are read from `tls.crt` / `tls.key` in the configured
//! directory, where cert-manager (or the test harness) mounts them.

pub mod byo_host;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::post;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use crate::error::ControllerError;

/// Path the ValidatingWebhookConfiguration points at for ByoHosts
pub const VALIDATE_BYOHOST_PATH: &str =
    "/validate-infrastructure-cluster-x-k8s-io-v1beta1-byohost";

/// Shared webhook state
#[derive(Debug, Clone)]
pub struct WebhookState {
    /// Username of the manager itself, always admitted
    pub manager_service_account: String,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_BYOHOST_PATH, post(byo_host::validate_handler))
        .with_state(state)
}

/// Serve the webhooks until the listener fails. Without certificates the
/// webhook stays disabled and this future never completes.
pub async fn serve(
    addr: SocketAddr,
    cert_dir: &Path,
    state: Arc<WebhookState>,
) -> Result<(), ControllerError> {
    let cert = cert_dir.join("tls.crt");
    let key = cert_dir.join("tls.key");
    let present = tokio::fs::try_exists(&cert).await.unwrap_or(false)
        && tokio::fs::try_exists(&key).await.unwrap_or(false);
    if !present {
        warn!(
            "No webhook certificates in {}, admission webhook disabled",
            cert_dir.display()
        );
        std::future::pending::<()>().await;
        return Ok(());
    }

    let tls_config = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .map_err(|e| ControllerError::Server(format!("webhook TLS config: {}", e)))?;

    info!("Serving admission webhooks on {}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .serve(router(state).into_make_service())
        .await
        .map_err(|e| ControllerError::Server(format!("webhook server: {}", e)))
}
