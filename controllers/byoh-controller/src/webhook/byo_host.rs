//! ByoHost validating webhook
//!
//! - a bound host cannot be deleted
//! - a host agent may only create or update the record named after it
//!
//! Other users, including the manager, pass.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use crds::{ByoHost, HOST_USER_PREFIX, host_username};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{error, info};

use super::WebhookState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(String),
}

pub fn validate_byohost(
    operation: &Operation,
    username: &str,
    name: &str,
    old: Option<&ByoHost>,
    manager_service_account: &str,
) -> Verdict {
    match operation {
        Operation::Delete => {
            if old.is_some_and(ByoHost::is_bound) {
                Verdict::Denied(format!(
                    "cannot delete ByoHost {} while it is bound to a ByoMachine",
                    name
                ))
            } else {
                Verdict::Allowed
            }
        }
        Operation::Create | Operation::Update => {
            if username == manager_service_account || !username.starts_with(HOST_USER_PREFIX) {
                return Verdict::Allowed;
            }
            if username == host_username(name) {
                Verdict::Allowed
            } else {
                Verdict::Denied(format!("{} cannot modify ByoHost {}", username, name))
            }
        }
        _ => Verdict::Allowed,
    }
}

pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<ByoHost>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ByoHost> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let username = req.user_info.username.as_deref().unwrap_or_default();
    let verdict = validate_byohost(
        &req.operation,
        username,
        &req.name,
        req.old_object.as_ref(),
        &state.manager_service_account,
    );
    let response = AdmissionResponse::from(&req);
    let response = match verdict {
        Verdict::Allowed => response,
        Verdict::Denied(reason) => {
            info!(uid = %req.uid, user = %username, "Denied ByoHost request: {}", reason);
            response.deny(reason)
        }
    };
    Json(response.into_review())
}
