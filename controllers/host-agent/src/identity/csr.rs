//! Certificate signing request flow for the agent identity

use std::time::Duration;

use crds::{HOST_ORGANIZATION, csr_name, host_username};
use k8s_openapi::ByteString;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec};
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use kube_runtime::wait::await_condition;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::info;

use crate::error::AgentError;

/// Signer for client certificates trusted by the API server
pub const SIGNER_NAME: &str = "kubernetes.io/kube-apiserver-client";

pub const CLIENT_AUTH_USAGE: &str = "client auth";

/// Fresh key pair and the PEM request for the host identity
#[derive(Debug)]
pub struct CertificateRequest {
    pub csr_pem: String,
    pub key_pem: String,
}

/// Generate a key and a CSR with CN `byoh:host:<hostname>`, O `byoh:hosts`.
pub fn generate_request(hostname: &str) -> Result<CertificateRequest, AgentError> {
    let key = KeyPair::generate().map_err(|e| AgentError::Crypto(e.to_string()))?;
    let mut params = CertificateParams::default();
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, host_username(hostname));
    subject.push(DnType::OrganizationName, HOST_ORGANIZATION);
    params.distinguished_name = subject;
    let csr = params
        .serialize_request(&key)
        .map_err(|e| AgentError::Crypto(e.to_string()))?;
    Ok(CertificateRequest {
        csr_pem: csr.pem().map_err(|e| AgentError::Crypto(e.to_string()))?,
        key_pem: key.serialize_pem(),
    })
}

pub fn csr_object(hostname: &str, csr_pem: &str, expiry: Duration) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(csr_name(hostname)),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(csr_pem.as_bytes().to_vec()),
            signer_name: SIGNER_NAME.to_string(),
            usages: Some(vec![CLIENT_AUTH_USAGE.to_string()]),
            expiration_seconds: Some(i32::try_from(expiry.as_secs()).unwrap_or(i32::MAX)),
            ..Default::default()
        },
        status: None,
    }
}

/// Outcome of a request so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Issued(Vec<u8>),
    Rejected(String),
}

pub fn request_state(csr: &CertificateSigningRequest) -> RequestState {
    let Some(status) = csr.status.as_ref() else {
        return RequestState::Pending;
    };
    for condition in status.conditions.iter().flatten() {
        if (condition.type_ == "Denied" || condition.type_ == "Failed") && condition.status == "True"
        {
            let reason = condition
                .message
                .clone()
                .or_else(|| condition.reason.clone())
                .unwrap_or_else(|| condition.type_.clone());
            return RequestState::Rejected(format!("{}: {}", condition.type_, reason));
        }
    }
    match &status.certificate {
        Some(cert) if !cert.0.is_empty() => RequestState::Issued(cert.0.clone()),
        _ => RequestState::Pending,
    }
}

/// Submit a request for `hostname` and wait for the signed certificate.
///
/// Returns the PEM certificate and the matching private key.
pub async fn request_certificate(
    client: Client,
    hostname: &str,
    expiry: Duration,
    timeout: Duration,
) -> Result<(Vec<u8>, String), AgentError> {
    let name = csr_name(hostname);
    let api: Api<CertificateSigningRequest> = Api::all(client);
    let request = generate_request(hostname)?;
    let csr = csr_object(hostname, &request.csr_pem, expiry);

    match api.create(&PostParams::default(), &csr).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            // A request from an earlier key cannot be used with this one
            info!("Replacing stale CertificateSigningRequest {}", name);
            api.delete(&name, &DeleteParams::default()).await?;
            api.create(&PostParams::default(), &csr).await?;
        }
        Err(e) => return Err(e.into()),
    }
    info!("Submitted CertificateSigningRequest {}, waiting for approval", name);

    let decided = |obj: Option<&CertificateSigningRequest>| {
        obj.is_some_and(|csr| request_state(csr) != RequestState::Pending)
    };
    let waited = tokio::time::timeout(timeout, await_condition(api, &name, decided))
        .await
        .map_err(|_| AgentError::Certificate {
            name: name.clone(),
            reason: format!("not approved within {:?}", timeout),
        })?
        .map_err(|e| AgentError::Certificate {
            name: name.clone(),
            reason: e.to_string(),
        })?;

    match waited.as_ref().map(request_state) {
        Some(RequestState::Issued(cert)) => {
            info!("CertificateSigningRequest {} issued", name);
            Ok((cert, request.key_pem))
        }
        Some(RequestState::Rejected(reason)) => Err(AgentError::Certificate { name, reason }),
        _ => Err(AgentError::Certificate {
            name,
            reason: "deleted before it was issued".to_string(),
        }),
    }
}
