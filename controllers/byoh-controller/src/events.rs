//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails a
//! reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Reporting component shown on events
pub const CONTROLLER_NAME: &str = "byoh-controller-manager";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube_runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that remembers reasons instead of talking to the API server
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct RecordingEventPublisher {
    pub reasons: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl RecordingEventPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        if let Ok(mut reasons) = self.reasons.lock() {
            reasons.push(reason.to_string());
        }
    }
}

/// Event reasons emitted by the manager
pub mod reasons {
    pub const HOST_BOUND: &str = "ByoHostBound";
    pub const HOSTS_UNAVAILABLE: &str = "BYOHostsUnavailable";
    pub const HOST_CLEANUP_REQUESTED: &str = "ByoHostCleanupRequested";
    pub const PROVIDER_ID_SET: &str = "ProviderIDSet";
    pub const PROVIDER_ID_FAILED: &str = "NodeProviderIDFailed";
    pub const INSTALLATION_NOT_SUPPORTED: &str = "InstallationNotSupported";
    pub const INSTALLATION_SECRET_CREATED: &str = "InstallationSecretCreated";
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
    pub const CSR_APPROVED: &str = "CertificateRequestApproved";
    pub const BOOTSTRAP_TOKEN_CREATED: &str = "BootstrapTokenCreated";
}

/// Event actions
pub mod actions {
    pub const BIND: &str = "Bind";
    pub const RELEASE: &str = "Release";
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
    pub const APPROVE: &str = "Approve";
}
