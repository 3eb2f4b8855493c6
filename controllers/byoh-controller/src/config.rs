//! Controller manager configuration.
//!
//! Everything is read from environment variables so the manager can be
//! configured from its Deployment manifest.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ControllerError;

const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_WEBHOOK_BIND_ADDRESS: &str = "0.0.0.0:9443";
const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
const DEFAULT_MANAGER_SERVICE_ACCOUNT: &str =
    "system:serviceaccount:byoh-system:byoh-controller-manager";
const DEFAULT_BOOTSTRAP_TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

/// Reconcile parallelism per watched kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concurrency {
    pub byo_machine: u16,
    pub byo_cluster: u16,
    pub installer_config: u16,
    pub csr: u16,
    pub bootstrap_kubeconfig: u16,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            byo_machine: 3,
            byo_cluster: 1,
            installer_config: 1,
            csr: 1,
            bootstrap_kubeconfig: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    pub metrics_bind_address: SocketAddr,
    pub webhook_bind_address: SocketAddr,
    /// Directory holding `tls.crt` and `tls.key` for the webhook server
    pub webhook_cert_dir: PathBuf,
    /// Username of the manager's own service account, always admitted by the webhook
    pub manager_service_account: String,
    /// Lifetime of minted bootstrap tokens
    pub bootstrap_token_ttl: Duration,
    pub concurrency: Concurrency,
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let metrics_bind_address = parse_addr(
            "METRICS_BIND_ADDRESS",
            lookup("METRICS_BIND_ADDRESS").as_deref(),
            DEFAULT_METRICS_BIND_ADDRESS,
        )?;
        let webhook_bind_address = parse_addr(
            "WEBHOOK_BIND_ADDRESS",
            lookup("WEBHOOK_BIND_ADDRESS").as_deref(),
            DEFAULT_WEBHOOK_BIND_ADDRESS,
        )?;

        let webhook_cert_dir = PathBuf::from(
            lookup("WEBHOOK_CERT_DIR").unwrap_or_else(|| DEFAULT_WEBHOOK_CERT_DIR.to_string()),
        );
        let manager_service_account = lookup("MANAGER_SERVICE_ACCOUNT")
            .unwrap_or_else(|| DEFAULT_MANAGER_SERVICE_ACCOUNT.to_string());

        let ttl_secs = match lookup("BOOTSTRAP_TOKEN_TTL") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("BOOTSTRAP_TOKEN_TTL {:?}: {}", raw, e))
            })?,
            None => DEFAULT_BOOTSTRAP_TOKEN_TTL_SECS,
        };
        if ttl_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "BOOTSTRAP_TOKEN_TTL must be greater than zero".to_string(),
            ));
        }

        let defaults = Concurrency::default();
        let concurrency = Concurrency {
            byo_machine: parse_concurrency(&lookup, "BYOMACHINE_CONCURRENCY", defaults.byo_machine)?,
            byo_cluster: parse_concurrency(&lookup, "BYOCLUSTER_CONCURRENCY", defaults.byo_cluster)?,
            installer_config: parse_concurrency(
                &lookup,
                "K8SINSTALLERCONFIG_CONCURRENCY",
                defaults.installer_config,
            )?,
            csr: parse_concurrency(&lookup, "CSR_CONCURRENCY", defaults.csr)?,
            bootstrap_kubeconfig: parse_concurrency(
                &lookup,
                "BOOTSTRAPKUBECONFIG_CONCURRENCY",
                defaults.bootstrap_kubeconfig,
            )?,
        };

        Ok(Self {
            namespace,
            metrics_bind_address,
            webhook_bind_address,
            webhook_cert_dir,
            manager_service_account,
            bootstrap_token_ttl: Duration::from_secs(ttl_secs),
            concurrency,
        })
    }
}

fn parse_addr(key: &str, raw: Option<&str>, default: &str) -> Result<SocketAddr, ControllerError> {
    let raw = raw.unwrap_or(default);
    raw.parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{} {:?}: {}", key, raw, e)))
}

fn parse_concurrency<F>(lookup: &F, key: &str, default: u16) -> Result<u16, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u16>() {
            Ok(0) | Err(_) => Err(ControllerError::InvalidConfig(format!(
                "{} must be a positive integer, got {:?}",
                key, raw
            ))),
            Ok(n) => Ok(n),
        },
    }
}
