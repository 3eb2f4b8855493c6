//! Prometheus metrics and health probes.
//!
//! Served over plain HTTP on `METRICS_BIND_ADDRESS`:
//! - `/metrics` text exposition of the manager registry
//! - `/healthz` always 200 once the listener is up
//! - `/readyz` 200 after every watcher has been started

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::info;

use crate::error::ControllerError;

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_errors: IntCounterVec,
    hosts_bound: IntCounter,
    hosts_unavailable: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("byoh".to_string()), None)?;

        let reconciliations = IntCounterVec::new(
            Opts::new("reconciliations_total", "Reconciliations started, per kind"),
            &["kind"],
        )?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Failed reconciliations, per kind"),
            &["kind"],
        )?;
        let hosts_bound = IntCounter::new("hosts_bound_total", "Hosts bound to machines")?;
        let hosts_unavailable = IntCounter::new(
            "hosts_unavailable_total",
            "Machine reconciles that found no matching free host",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(hosts_bound.clone()))?;
        registry.register(Box::new(hosts_unavailable.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_errors,
            hosts_bound,
            hosts_unavailable,
        })
    }

    pub fn reconciled(&self, kind: &str) {
        self.reconciliations.with_label_values(&[kind]).inc();
    }

    pub fn failed(&self, kind: &str) {
        self.reconcile_errors.with_label_values(&[kind]).inc();
    }

    pub fn host_bound(&self) {
        self.hosts_bound.inc();
    }

    pub fn hosts_unavailable(&self) {
        self.hosts_unavailable.inc();
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ProbeState {
    pub metrics: Arc<Metrics>,
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn readyz_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serve metrics and probes until the listener fails.
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Server(format!("bind metrics listener {}: {}", addr, e)))?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| ControllerError::Server(format!("metrics server: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(ready: bool) -> ProbeState {
        ProbeState {
            metrics: Arc::new(Metrics::new().unwrap()),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    #[test]
    fn test_counters_are_exposed() {
        let metrics = Metrics::new().unwrap();
        metrics.reconciled("ByoMachine");
        metrics.reconciled("ByoMachine");
        metrics.failed("ByoCluster");
        metrics.host_bound();

        let text = metrics.encode().unwrap();
        assert!(text.contains("byoh_reconciliations_total{kind=\"ByoMachine\"} 2"));
        assert!(text.contains("byoh_reconcile_errors_total{kind=\"ByoCluster\"} 1"));
        assert!(text.contains("byoh_hosts_bound_total 1"));
    }

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let probe = state(false);
        let response = router(probe.clone())
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        probe.ready.store(true, Ordering::Relaxed);
        let response = router(probe)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz_and_metrics_routes() {
        let probe = state(true);
        let response = router(probe.clone())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(probe)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
