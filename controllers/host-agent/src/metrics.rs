//! Agent metrics and health probes.
//!
//! `/metrics`, `/healthz` and `/readyz` on `--metricsbindaddress`. Ready
//! means the host record is registered and the watcher runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::info;

use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounter,
    reconcile_errors: IntCounter,
    bootstrap_runs: IntCounter,
    bootstrap_failures: IntCounter,
    cleanup_runs: IntCounter,
    cleanup_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("byoh_agent".to_string()), None)?;

        let reconciliations =
            IntCounter::new("reconciliations_total", "Reconciliations of the host record")?;
        let reconcile_errors =
            IntCounter::new("reconcile_errors_total", "Failed reconciliations of the host record")?;
        let bootstrap_runs = IntCounter::new("bootstrap_runs_total", "Node bootstrap attempts")?;
        let bootstrap_failures =
            IntCounter::new("bootstrap_failures_total", "Failed node bootstrap attempts")?;
        let cleanup_runs = IntCounter::new("cleanup_runs_total", "Node cleanup attempts")?;
        let cleanup_failures =
            IntCounter::new("cleanup_failures_total", "Failed node cleanup attempts")?;

        for counter in [
            &reconciliations,
            &reconcile_errors,
            &bootstrap_runs,
            &bootstrap_failures,
            &cleanup_runs,
            &cleanup_failures,
        ] {
            registry.register(Box::new(counter.clone()))?;
        }

        Ok(Self {
            registry,
            reconciliations,
            reconcile_errors,
            bootstrap_runs,
            bootstrap_failures,
            cleanup_runs,
            cleanup_failures,
        })
    }

    pub fn reconciled(&self) {
        self.reconciliations.inc();
    }

    pub fn failed(&self) {
        self.reconcile_errors.inc();
    }

    pub fn bootstrap_started(&self) {
        self.bootstrap_runs.inc();
    }

    pub fn bootstrap_failed(&self) {
        self.bootstrap_failures.inc();
    }

    pub fn cleanup_started(&self) {
        self.cleanup_runs.inc();
    }

    pub fn cleanup_failed(&self) {
        self.cleanup_failures.inc();
    }

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

pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), AgentError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::Server(format!("bind metrics listener {}: {}", addr, e)))?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| AgentError::Server(format!("metrics server: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_route_exposes_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.bootstrap_started();
        metrics.cleanup_started();
        metrics.cleanup_failed();

        let state = ProbeState {
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        };
        let response = router(state.clone())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("byoh_agent_bootstrap_runs_total 1"));
        assert!(text.contains("byoh_agent_cleanup_failures_total 1"));

        let response = router(state)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
