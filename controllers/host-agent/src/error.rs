//! Agent error types.
//!
//! Transient errors are retried by the host watcher with backoff. Fatal
//! errors stop the agent so its supervisor can restart it.

use byoh_client::ByohClientError;
use cloudinit::CloudInitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Host record access error
    #[error("ByoHost error: {0}")]
    HostClient(#[from] ByohClientError),

    /// Kubeconfig could not be read or loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Invalid command line or environment
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Certificate request was denied, failed, or never approved
    #[error("Certificate request {name}: {reason}")]
    Certificate { name: String, reason: String },

    /// Key, CSR or certificate encoding failure
    #[error("Certificate encoding error: {0}")]
    Crypto(String),

    /// A secret the host needs is missing or incomplete
    #[error("Secret {0} unavailable")]
    SecretUnavailable(String),

    /// Bootstrap document failed to run
    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[source] CloudInitError),

    /// Install or uninstall script failed
    #[error("{script} script failed: {source}")]
    Script {
        script: &'static str,
        #[source]
        source: CloudInitError,
    },

    /// Local filesystem failure
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The agent cannot continue and must be restarted
    #[error("Fatal: {0}")]
    Fatal(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics server failure
    #[error("Server error: {0}")]
    Server(String),
}

impl AgentError {
    pub fn io(op: &'static str, path: impl std::fmt::Display, source: std::io::Error) -> Self {
        AgentError::Io {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// Transient errors are retried with backoff on the next reconcile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Kube(_)
                | AgentError::HostClient(_)
                | AgentError::SecretUnavailable(_)
                | AgentError::Bootstrap(_)
                | AgentError::Script { .. }
                | AgentError::Io { .. }
        )
    }

    /// Fatal errors end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AgentError::SecretUnavailable("default/s".to_string()).is_transient());
        assert!(
            AgentError::Script {
                script: "uninstall",
                source: CloudInitError::EmptyCommand(0),
            }
            .is_transient()
        );
        assert!(!AgentError::Config("bad".to_string()).is_transient());
        assert!(AgentError::Fatal("sentinel".to_string()).is_fatal());
        assert!(!AgentError::Fatal("sentinel".to_string()).is_transient());
    }
}
