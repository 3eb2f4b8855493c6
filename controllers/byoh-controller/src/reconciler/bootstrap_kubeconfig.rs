//! BootstrapKubeconfig reconciler
//!
//! Mints a kubeadm-style bootstrap token in `kube-system` and renders a
//! kubeconfig that authenticates with it, which a new host agent uses once to
//! register itself and request its own certificate.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use crds::{BootstrapKubeconfig, BootstrapKubeconfigSpec};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info};

use super::{Reconciler, is_lowercase_alnum, random_lowercase_alnum};
use crate::error::ControllerError;
use crate::events::{actions, reasons};

pub const TOKEN_NAMESPACE: &str = "kube-system";
pub const TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";
pub const TOKEN_SECRET_PREFIX: &str = "bootstrap-token-";
pub const TOKEN_EXTRA_GROUPS: &str = "system:bootstrappers:kubeadm:default-node-token";

pub const KUBECONFIG_CLUSTER: &str = "default-cluster";
pub const KUBECONFIG_USER: &str = "tls-bootstrap-token-user";
pub const KUBECONFIG_CONTEXT: &str = "tls-bootstrap-token-user@kubernetes";

const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
const PEM_CERTIFICATE_HEADER: &str = "-----BEGIN CERTIFICATE-----";

/// A `<id>.<secret>` bootstrap token
pub struct BootstrapToken {
    pub id: String,
    secret: SecretString,
}

impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl BootstrapToken {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            id: random_lowercase_alnum(rng, TOKEN_ID_LEN),
            secret: SecretString::from(random_lowercase_alnum(rng, TOKEN_SECRET_LEN)),
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        let (id, secret) = token.split_once('.')?;
        (is_lowercase_alnum(id, TOKEN_ID_LEN) && is_lowercase_alnum(secret, TOKEN_SECRET_LEN))
            .then(|| Self {
                id: id.to_string(),
                secret: SecretString::from(secret.to_string()),
            })
    }

    pub fn secret_name(&self) -> String {
        format!("{}{}", TOKEN_SECRET_PREFIX, self.id)
    }

    /// The full token, as presented to the API server.
    pub fn expose(&self) -> String {
        format!("{}.{}", self.id, self.secret.expose_secret())
    }
}

/// `kube-system` secret backing `token`, valid until `now + ttl`.
pub fn token_secret(
    token: &BootstrapToken,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Secret, ControllerError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| ControllerError::InvalidConfig(format!("bootstrap token ttl: {}", e)))?;
    let expiration = (now + ttl).to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(token.secret_name()),
            namespace: Some(TOKEN_NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some(TOKEN_SECRET_TYPE.to_string()),
        string_data: Some(BTreeMap::from([
            ("token-id".to_string(), token.id.clone()),
            (
                "token-secret".to_string(),
                token.secret.expose_secret().to_string(),
            ),
            ("expiration".to_string(), expiration),
            ("usage-bootstrap-authentication".to_string(), "true".to_string()),
            ("usage-bootstrap-signing".to_string(), "true".to_string()),
            ("auth-extra-groups".to_string(), TOKEN_EXTRA_GROUPS.to_string()),
        ])),
        ..Default::default()
    })
}

/// Check the API server URL and CA bundle before minting a token.
pub fn validate_spec(spec: &BootstrapKubeconfigSpec) -> Result<(), ControllerError> {
    let host = spec
        .apiserver
        .strip_prefix("https://")
        .ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "apiserver {:?} must be an https URL",
                spec.apiserver
            ))
        })?;
    if host.trim_end_matches('/').is_empty() {
        return Err(ControllerError::InvalidConfig(
            "apiserver URL has no host".to_string(),
        ));
    }

    let insecure = spec.insecure_skip_tls_verify.unwrap_or(false);
    if spec.certificate_authority_data.is_empty() {
        if insecure {
            return Ok(());
        }
        return Err(ControllerError::InvalidConfig(
            "certificateAuthorityData is required unless insecureSkipTLSVerify is set".to_string(),
        ));
    }
    let pem = STANDARD
        .decode(spec.certificate_authority_data.trim())
        .map_err(|e| {
            ControllerError::InvalidConfig(format!("certificateAuthorityData is not base64: {}", e))
        })?;
    if !String::from_utf8_lossy(&pem).contains(PEM_CERTIFICATE_HEADER) {
        return Err(ControllerError::InvalidConfig(
            "certificateAuthorityData holds no PEM certificate".to_string(),
        ));
    }
    Ok(())
}

/// Kubeconfig authenticating to `spec.apiserver` with `token`.
pub fn render_kubeconfig(
    spec: &BootstrapKubeconfigSpec,
    token: &BootstrapToken,
) -> Result<String, ControllerError> {
    let mut cluster = json!({ "server": spec.apiserver });
    if spec.insecure_skip_tls_verify.unwrap_or(false) {
        cluster["insecure-skip-tls-verify"] = json!(true);
    } else {
        cluster["certificate-authority-data"] = json!(spec.certificate_authority_data.trim());
    }
    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": KUBECONFIG_CLUSTER, "cluster": cluster }],
        "users": [{ "name": KUBECONFIG_USER, "user": { "token": token.expose() } }],
        "contexts": [{
            "name": KUBECONFIG_CONTEXT,
            "context": { "cluster": KUBECONFIG_CLUSTER, "user": KUBECONFIG_USER }
        }],
        "current-context": KUBECONFIG_CONTEXT,
    });
    Ok(serde_yaml::to_string(&kubeconfig)?)
}

impl Reconciler {
    pub async fn reconcile_bootstrap_kubeconfig(
        &self,
        bootstrap: &BootstrapKubeconfig,
    ) -> Result<Action, ControllerError> {
        let name = bootstrap.name_any();
        let namespace = bootstrap.namespace().unwrap_or_else(|| "default".to_string());
        if bootstrap.rendered().is_some() {
            debug!("BootstrapKubeconfig {}/{} already rendered", namespace, name);
            return Ok(Action::await_change());
        }
        info!("Reconciling BootstrapKubeconfig {}/{}", namespace, name);
        validate_spec(&bootstrap.spec)?;

        let token = BootstrapToken::generate(&mut rand::thread_rng());
        let secret = token_secret(&token, self.config.bootstrap_token_ttl, Utc::now())?;
        let secrets: Api<Secret> = self.namespaced(TOKEN_NAMESPACE);
        secrets.create(&PostParams::default(), &secret).await?;
        info!("Created bootstrap token {}", token.id);

        let rendered = render_kubeconfig(&bootstrap.spec, &token)?;
        self.namespaced::<BootstrapKubeconfig>(&namespace)
            .patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({ "status": { "bootstrapKubeconfigData": rendered } })),
            )
            .await?;
        self.publish(
            bootstrap,
            EventType::Normal,
            reasons::BOOTSTRAP_TOKEN_CREATED,
            actions::RECONCILE,
            Some(format!("token {}", token.id)),
        )
        .await;
        Ok(Action::await_change())
    }
}
