//! Controller-specific error types.
//!
//! Errors classify themselves so the watcher's error policy can decide how
//! soon to retry: transient failures back off per object, configuration
//! errors wait for the user, and blocked deletions poll on a fixed interval.

use std::time::Duration;

use byoh_client::ByohClientError;
use installer::InstallerError;
use kube::Error as KubeError;
use kube_runtime::finalizer;
use thiserror::Error;

/// Requeue interval while a deletion waits on dependent objects
pub const DELETION_BLOCKED_REQUEUE: Duration = Duration::from_secs(10);

/// Errors that can occur in the BYOH controller manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Host record access error
    #[error("ByoHost error: {0}")]
    HostClient(#[from] ByohClientError),

    /// Installer script generation failed
    #[error("Installer error: {0}")]
    Installer(#[from] InstallerError),

    /// Invalid configuration (environment or object spec)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A referenced object does not exist yet
    #[error("Missing object: {0}")]
    MissingObject(String),

    /// The workload node for a host does not exist yet
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// An existing provider ID does not belong to the host
    #[error("Invalid provider ID: {0}")]
    ProviderId(String),

    /// Workload cluster client could not be built
    #[error("Remote cluster error: {0}")]
    RemoteCluster(String),

    /// Optimistic update kept losing to concurrent writers
    #[error("Update conflict: {0}")]
    Conflict(String),

    /// Deletion waits for dependent objects to go away
    #[error("Deletion blocked: {0}")]
    DeletionBlocked(String),

    /// Finalizer bookkeeping or the wrapped reconcile failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics or webhook server failure
    #[error("Server error: {0}")]
    Server(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Transient errors are retried with backoff; everything else waits for
    /// the object to change.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_)
            | ControllerError::HostClient(_)
            | ControllerError::MissingObject(_)
            | ControllerError::NodeNotFound(_)
            | ControllerError::RemoteCluster(_)
            | ControllerError::Conflict(_)
            | ControllerError::DeletionBlocked(_)
            | ControllerError::Watch(_) => true,
            ControllerError::Finalizer(inner) => match inner.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.is_transient()
                }
                _ => true,
            },
            ControllerError::Installer(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::ProviderId(_)
            | ControllerError::Serialization(_)
            | ControllerError::Yaml(_)
            | ControllerError::Server(_) => false,
        }
    }

    /// Fixed requeue interval, overriding backoff, when the error asks for one.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ControllerError::DeletionBlocked(_) => Some(DELETION_BLOCKED_REQUEUE),
            ControllerError::Finalizer(inner) => match inner.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.requeue_after()
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<finalizer::Error<ControllerError>> for ControllerError {
    fn from(err: finalizer::Error<ControllerError>) -> Self {
        ControllerError::Finalizer(Box::new(err))
    }
}
