//! Approval of host agent certificate requests

use chrono::{DateTime, SecondsFormat, Utc};
use crds::CSR_NAME_PREFIX;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{actions, reasons};

pub const APPROVAL_REASON: &str = "ByohCSRAutoApproved";
pub const APPROVAL_MESSAGE: &str = "approved by the BYOH controller manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
}

pub fn is_host_csr(name: &str) -> bool {
    name.len() > CSR_NAME_PREFIX.len() && name.starts_with(CSR_NAME_PREFIX)
}

pub fn approval_state(csr: &CertificateSigningRequest) -> ApprovalState {
    let conditions = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    let has = |type_: &str| {
        conditions
            .iter()
            .any(|c| c.type_ == type_ && c.status != "False")
    };
    if has("Denied") {
        ApprovalState::Denied
    } else if has("Approved") {
        ApprovalState::Approved
    } else {
        ApprovalState::Pending
    }
}

/// Patch for the approval subresource adding an Approved condition while
/// keeping existing ones.
pub fn approval_patch(
    csr: &CertificateSigningRequest,
    now: DateTime<Utc>,
) -> Result<Value, ControllerError> {
    let mut conditions = match csr.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(existing) => serde_json::to_value(existing)?
            .as_array()
            .cloned()
            .unwrap_or_default(),
        None => Vec::new(),
    };
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    conditions.push(json!({
        "type": "Approved",
        "status": "True",
        "reason": APPROVAL_REASON,
        "message": APPROVAL_MESSAGE,
        "lastUpdateTime": timestamp,
        "lastTransitionTime": timestamp,
    }));
    Ok(json!({ "status": { "conditions": conditions } }))
}

impl Reconciler {
    pub async fn reconcile_csr(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<Action, ControllerError> {
        let name = csr.name_any();
        if !is_host_csr(&name) {
            return Ok(Action::await_change());
        }
        match approval_state(csr) {
            ApprovalState::Pending => {}
            state => {
                debug!("CertificateSigningRequest {} already {:?}", name, state);
                return Ok(Action::await_change());
            }
        }

        info!("Approving CertificateSigningRequest {}", name);
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let patch = approval_patch(csr, Utc::now())?;
        api.patch_approval(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        self.publish(
            csr,
            EventType::Normal,
            reasons::CSR_APPROVED,
            actions::APPROVE,
            None,
        )
        .await;
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::certificates::v1::{
        CertificateSigningRequestCondition, CertificateSigningRequestStatus,
    };

    fn csr(name: &str, conditions: Option<Vec<(&str, &str)>>) -> CertificateSigningRequest {
        let mut csr = CertificateSigningRequest::default();
        csr.metadata.name = Some(name.to_string());
        csr.status = conditions.map(|conds| CertificateSigningRequestStatus {
            conditions: Some(
                conds
                    .into_iter()
                    .map(|(type_, status)| CertificateSigningRequestCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        });
        csr
    }

    #[test]
    fn test_only_host_requests_are_handled() {
        assert!(is_host_csr("byoh-csr-host-1"));
        assert!(!is_host_csr("byoh-csr-"));
        assert!(!is_host_csr("csr-abc12"));
        assert!(!is_host_csr("node-csr-byoh-csr-host-1"));
    }

    #[test]
    fn test_approval_state() {
        assert_eq!(approval_state(&csr("byoh-csr-h", None)), ApprovalState::Pending);
        assert_eq!(
            approval_state(&csr("byoh-csr-h", Some(vec![("Approved", "True")]))),
            ApprovalState::Approved
        );
        assert_eq!(
            approval_state(&csr("byoh-csr-h", Some(vec![("Denied", "True")]))),
            ApprovalState::Denied
        );
        assert_eq!(
            approval_state(&csr("byoh-csr-h", Some(vec![("Approved", "False")]))),
            ApprovalState::Pending
        );
    }

    #[test]
    fn test_approval_patch_appends_condition() {
        let now = DateTime::parse_from_rfc3339("2026-10-16T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let patch = approval_patch(&csr("byoh-csr-h", Some(vec![("Failed", "False")])), now).unwrap();
        let conditions = patch["status"]["conditions"].as_array().unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0]["type"], "Failed");
        assert_eq!(conditions[1]["type"], "Approved");
        assert_eq!(conditions[1]["status"], "True");
        assert_eq!(conditions[1]["reason"], APPROVAL_REASON);
        assert_eq!(conditions[1]["lastUpdateTime"], "2026-10-16T09:00:00Z");
    }

    #[tokio::test]
    async fn test_reconcile_approves_pending_host_request() {
        let approved = serde_json::to_value(csr("byoh-csr-host-1", Some(vec![("Approved", "True")])))
            .unwrap();
        let (client, log) = crate::test_utils::fake_api_client(move |method, path| {
            if method == "PATCH"
                && path == "/apis/certificates.k8s.io/v1/certificatesigningrequests/byoh-csr-host-1/approval"
            {
                (200, approved.clone())
            } else {
                crate::test_utils::not_found()
            }
        });
        let (reconciler, events) =
            crate::test_utils::create_test_reconciler(client, byoh_client::MockByoHostClient::new());

        reconciler.reconcile_csr(&csr("byoh-csr-host-1", None)).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(events.reasons(), vec![reasons::CSR_APPROVED.to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_ignores_foreign_and_decided_requests() {
        let (client, log) = crate::test_utils::fake_api_client(|_, _| crate::test_utils::not_found());
        let (reconciler, events) =
            crate::test_utils::create_test_reconciler(client, byoh_client::MockByoHostClient::new());

        reconciler.reconcile_csr(&csr("csr-x7k2p", None)).await.unwrap();
        reconciler
            .reconcile_csr(&csr("byoh-csr-host-1", Some(vec![("Denied", "True")])))
            .await
            .unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert!(events.reasons().is_empty());
    }
}
