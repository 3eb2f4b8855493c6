//! Command line of the host agent.
//!
//! Flag spellings follow the upstream agent so existing unit files keep
//! working (`--downloadpath`, `--certExpiryDuration`, ...).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::AgentError;

pub const DEFAULT_DOWNLOAD_PATH: &str = "/var/lib/byoh/bundles";
pub const DEFAULT_KUBECONFIG: &str = ".byoh/config";

#[derive(Debug, Clone, Parser)]
#[command(name = "byoh-hostagent", version, about = "Bring-your-own-host agent")]
pub struct Args {
    /// Kubeconfig with a short-lived bootstrap token, used to request the host identity
    #[arg(long = "bootstrap-kubeconfig")]
    pub bootstrap_kubeconfig: Option<PathBuf>,

    /// Persistent kubeconfig written after the certificate request is approved
    /// (default ~/.byoh/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace of the ByoHost record
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Labels for the ByoHost record, `k=v[,k=v]`; repeatable
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Directory bundles are downloaded to
    #[arg(long = "downloadpath", default_value = DEFAULT_DOWNLOAD_PATH)]
    pub download_path: PathBuf,

    /// Treat the host as already having the Kubernetes components installed
    #[arg(long = "skip-installation")]
    pub skip_installation: bool,

    /// Address of the metrics and probe listener
    #[arg(long = "metricsbindaddress", default_value = ":8080", value_parser = parse_bind_address)]
    pub metrics_bind_address: SocketAddr,

    /// Requested client certificate lifetime, in seconds
    #[arg(long = "certExpiryDuration", default_value_t = 86_400)]
    pub cert_expiry_seconds: u64,

    /// Renew the client certificate this many seconds before it expires
    #[arg(long = "certRotationWindow", default_value_t = 7_200)]
    pub cert_rotation_window_seconds: u64,

    /// Give up waiting for certificate approval after this many seconds
    #[arg(long = "csrApprovalTimeout", default_value_t = 900)]
    pub csr_approval_timeout_seconds: u64,

    /// Host name override; defaults to the system host name
    #[arg(long)]
    pub hostname: Option<String>,

    /// Log verbosity (0 info, 1-3 debug, 4+ trace); RUST_LOG takes precedence
    #[arg(long = "v", default_value_t = 0)]
    pub verbosity: u8,
}

/// Accepts `host:port` and the `:port` shorthand.
pub fn parse_bind_address(value: &str) -> Result<SocketAddr, String> {
    let value = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    value
        .parse()
        .map_err(|e| format!("invalid bind address {:?}: {}", value, e))
}

/// Parse repeated `k=v[,k=v]` label flags into one map.
pub fn parse_labels(values: &[String]) -> Result<BTreeMap<String, String>, AgentError> {
    let mut labels = BTreeMap::new();
    for pair in values.iter().flat_map(|v| v.split(',')) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                labels.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(AgentError::Config(format!(
                    "label {:?} is not of the form key=value",
                    pair
                )));
            }
        }
    }
    Ok(labels)
}

/// Log filter directive for `--v`.
pub fn log_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1..=3 => "debug",
        _ => "trace",
    }
}

/// Validated agent settings.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub hostname: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub kubeconfig: PathBuf,
    pub bootstrap_kubeconfig: Option<PathBuf>,
    pub download_path: PathBuf,
    pub skip_installation: bool,
    pub metrics_bind_address: SocketAddr,
    pub cert_expiry: Duration,
    pub cert_rotation_window: Duration,
    pub csr_approval_timeout: Duration,
}

impl AgentSettings {
    pub fn from_args(args: Args) -> Result<Self, AgentError> {
        let hostname = match args.hostname {
            Some(name) => name,
            None => nix::unistd::gethostname()
                .map_err(|e| AgentError::Config(format!("cannot read host name: {}", e)))?
                .to_string_lossy()
                .into_owned(),
        };
        let hostname = hostname.trim().to_lowercase();
        if hostname.is_empty() {
            return Err(AgentError::Config("host name is empty".to_string()));
        }

        let kubeconfig = match args.kubeconfig {
            Some(path) => path,
            None => {
                let home = std::env::var_os("HOME").ok_or_else(|| {
                    AgentError::Config("--kubeconfig not set and HOME is unknown".to_string())
                })?;
                PathBuf::from(home).join(DEFAULT_KUBECONFIG)
            }
        };

        if args.cert_expiry_seconds == 0 {
            return Err(AgentError::Config(
                "--certExpiryDuration must be positive".to_string(),
            ));
        }
        if args.cert_rotation_window_seconds >= args.cert_expiry_seconds {
            return Err(AgentError::Config(format!(
                "--certRotationWindow ({}s) must be shorter than --certExpiryDuration ({}s)",
                args.cert_rotation_window_seconds, args.cert_expiry_seconds
            )));
        }

        Ok(Self {
            hostname,
            namespace: args.namespace,
            labels: parse_labels(&args.labels)?,
            kubeconfig,
            bootstrap_kubeconfig: args.bootstrap_kubeconfig,
            download_path: args.download_path,
            skip_installation: args.skip_installation,
            metrics_bind_address: args.metrics_bind_address,
            cert_expiry: Duration::from_secs(args.cert_expiry_seconds),
            cert_rotation_window: Duration::from_secs(args.cert_rotation_window_seconds),
            csr_approval_timeout: Duration::from_secs(args.csr_approval_timeout_seconds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["byoh-hostagent", "--hostname", "Host-1", "--kubeconfig", "/tmp/kc"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = AgentSettings::from_args(args(&[])).unwrap();
        assert_eq!(settings.hostname, "host-1");
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.download_path, PathBuf::from(DEFAULT_DOWNLOAD_PATH));
        assert_eq!(settings.metrics_bind_address.port(), 8080);
        assert_eq!(settings.cert_expiry, Duration::from_secs(86_400));
        assert!(!settings.skip_installation);
        assert!(settings.labels.is_empty());
    }

    #[test]
    fn test_upstream_flag_spellings() {
        let settings = AgentSettings::from_args(args(&[
            "--downloadpath",
            "/opt/bundles",
            "--skip-installation",
            "--metricsbindaddress",
            "127.0.0.1:9090",
            "--certExpiryDuration",
            "3600",
            "--certRotationWindow",
            "600",
            "--label",
            "site=a,role=worker",
            "--label",
            "rack=r1",
        ]))
        .unwrap();
        assert_eq!(settings.download_path, PathBuf::from("/opt/bundles"));
        assert!(settings.skip_installation);
        assert_eq!(settings.metrics_bind_address.to_string(), "127.0.0.1:9090");
        assert_eq!(settings.cert_rotation_window, Duration::from_secs(600));
        assert_eq!(settings.labels.len(), 3);
        assert_eq!(settings.labels["role"], "worker");
    }

    #[test]
    fn test_rotation_window_must_fit_lifetime() {
        let err = AgentSettings::from_args(args(&["--certExpiryDuration", "600"])).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_malformed_label() {
        assert!(parse_labels(&["site".to_string()]).is_err());
        assert!(parse_labels(&["=a".to_string()]).is_err());
        assert!(parse_labels(&["a=".to_string()]).unwrap()["a"].is_empty());
    }

    #[test]
    fn test_log_directive() {
        assert_eq!(log_directive(0), "info");
        assert_eq!(log_directive(2), "debug");
        assert_eq!(log_directive(9), "trace");
    }
}
