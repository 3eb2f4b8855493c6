//! Watch of the agent's own host record.
//!
//! A single-object `kube_runtime::Controller` filtered by field selector on
//! the host name. Transient failures back off exponentially; a fatal error
//! stops the controller and is returned to the caller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crds::ByoHost;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::AgentError;
use crate::reconciler::HostReconciler;

/// Requeue for errors that retrying will not fix
const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared state of the host watch
pub struct HostContext {
    pub reconciler: HostReconciler,
    backoff: Mutex<ExponentialBackoff>,
    fatal: Mutex<Option<String>>,
    shutdown: Arc<Notify>,
}

impl HostContext {
    pub fn new(reconciler: HostReconciler) -> Self {
        Self {
            reconciler,
            backoff: Mutex::new(ExponentialBackoff::default()),
            fatal: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn take_fatal(&self) -> Option<String> {
        lock(&self.fatal).take()
    }
}

async fn reconcile(host: Arc<ByoHost>, ctx: Arc<HostContext>) -> Result<Action, AgentError> {
    debug!("Reconciling ByoHost {}", host.name_any());
    let metrics = &ctx.reconciler.metrics;
    metrics.reconciled();
    match ctx.reconciler.reconcile(&host).await {
        Ok(action) => {
            lock(&ctx.backoff).reset();
            Ok(action)
        }
        Err(e) => {
            metrics.failed();
            Err(e)
        }
    }
}

fn error_policy(host: Arc<ByoHost>, error: &AgentError, ctx: Arc<HostContext>) -> Action {
    let name = host.name_any();
    if error.is_fatal() {
        error!("ByoHost {} hit a fatal error, stopping: {}", name, error);
        *lock(&ctx.fatal) = Some(error.to_string());
        ctx.shutdown.notify_one();
        return Action::await_change();
    }
    if error.is_transient() {
        let delay = lock(&ctx.backoff).next_backoff();
        warn!("ByoHost {} failed, retry in {:?}: {}", name, delay, error);
        Action::requeue(delay)
    } else {
        error!(
            "ByoHost {} failed permanently, retry in {:?}: {}",
            name, PERMANENT_ERROR_REQUEUE, error
        );
        Action::requeue(PERMANENT_ERROR_REQUEUE)
    }
}

/// Reconcile `namespace/hostname` until the watch ends or a fatal error occurs.
pub async fn watch_host(
    client: Client,
    namespace: &str,
    hostname: &str,
    ctx: Arc<HostContext>,
) -> Result<(), AgentError> {
    info!("Watching ByoHost {}/{}", namespace, hostname);
    let api: Api<ByoHost> = Api::namespaced(client, namespace);
    let selector = format!("metadata.name={}", hostname);
    let shutdown = ctx.shutdown.clone();

    Controller::new(api, watcher::Config::default().fields(&selector))
        .with_config(ControllerConfig::default().concurrency(1))
        .graceful_shutdown_on(async move { shutdown.notified().await })
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("ByoHost controller event: {}", e);
            }
        })
        .await;

    match ctx.take_fatal() {
        Some(message) => Err(AgentError::Fatal(message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byoh_client::MockByoHostClient;

    use crate::metrics::Metrics;
    use crate::secrets::MockSecretReader;
    use crate::test_utils::*;

    fn context() -> Arc<HostContext> {
        let reconciler = HostReconciler::new(
            TEST_NAMESPACE,
            MockByoHostClient::new(),
            MockSecretReader::new(),
            Arc::new(RecordingRunner::new()),
            Arc::new(Metrics::new().unwrap()),
        );
        Arc::new(HostContext::new(reconciler))
    }

    #[test]
    fn test_transient_errors_back_off() {
        let ctx = context();
        let host = Arc::new(create_test_host("host-1"));
        let err = AgentError::SecretUnavailable("default/m1-bootstrap".to_string());
        assert_eq!(
            error_policy(host.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(2))
        );
        assert_eq!(
            error_policy(host.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(4))
        );
        let permanent = AgentError::Config("bad".to_string());
        assert_eq!(
            error_policy(host, &permanent, ctx.clone()),
            Action::requeue(PERMANENT_ERROR_REQUEUE)
        );
        assert!(ctx.take_fatal().is_none());
    }

    #[test]
    fn test_fatal_error_is_recorded() {
        let ctx = context();
        let host = Arc::new(create_test_host("host-1"));
        let err = AgentError::Fatal("cannot record bootstrap success".to_string());
        assert_eq!(error_policy(host, &err, ctx.clone()), Action::await_change());
        assert_eq!(
            ctx.take_fatal().as_deref(),
            Some("Fatal: cannot record bootstrap success")
        );
    }
}
