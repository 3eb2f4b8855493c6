//! Persistent agent kubeconfig: rendering, inspection and atomic writes

use std::fs::{DirBuilder, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use serde_yaml::Value;
use x509_parser::pem::parse_x509_pem;

use crate::error::AgentError;

const CLUSTER_NAME: &str = "default-cluster";
const USER_NAME: &str = "default-auth";
const CONTEXT_NAME: &str = "default-context";

/// API server coordinates taken from an existing kubeconfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub server: String,
    pub certificate_authority_data: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

fn named<'a>(doc: &'a Value, section: &str, name: &str, inner: &str) -> Option<&'a Value> {
    doc.get(section)?
        .as_sequence()?
        .iter()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))?
        .get(inner)
}

fn current_context(doc: &Value) -> Option<&Value> {
    let name = doc.get("current-context")?.as_str()?;
    named(doc, "contexts", name, "context")
}

fn parse(content: &str) -> Result<Value, AgentError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Cluster of the current context.
pub fn cluster_endpoint(content: &str) -> Result<ClusterEndpoint, AgentError> {
    let doc = parse(content)?;
    let cluster = current_context(&doc)
        .and_then(|ctx| ctx.get("cluster")?.as_str())
        .and_then(|name| named(&doc, "clusters", name, "cluster"))
        .ok_or_else(|| AgentError::Config("kubeconfig has no current cluster".to_string()))?;
    let server = cluster
        .get("server")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AgentError::Config("kubeconfig cluster has no server".to_string()))?;
    Ok(ClusterEndpoint {
        server: server.to_string(),
        certificate_authority_data: cluster
            .get("certificate-authority-data")
            .and_then(Value::as_str)
            .map(str::to_string),
        insecure_skip_tls_verify: cluster
            .get("insecure-skip-tls-verify")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// PEM client certificate of the current context's user.
pub fn client_certificate(content: &str) -> Result<Vec<u8>, AgentError> {
    let doc = parse(content)?;
    let data = current_context(&doc)
        .and_then(|ctx| ctx.get("user")?.as_str())
        .and_then(|name| named(&doc, "users", name, "user"))
        .and_then(|user| user.get("client-certificate-data")?.as_str())
        .ok_or_else(|| {
            AgentError::Config("kubeconfig user has no client-certificate-data".to_string())
        })?;
    STANDARD
        .decode(data)
        .map_err(|e| AgentError::Crypto(format!("client-certificate-data: {}", e)))
}

/// Expiry of a PEM certificate as Unix seconds.
pub fn certificate_not_after(pem: &[u8]) -> Result<i64, AgentError> {
    let (_, pem) =
        parse_x509_pem(pem).map_err(|e| AgentError::Crypto(format!("certificate PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| AgentError::Crypto(format!("certificate: {}", e)))?;
    Ok(cert.validity().not_after.timestamp())
}

/// True once `now` is inside the rotation window before `not_after`.
pub fn needs_rotation(not_after: i64, now: i64, window: Duration) -> bool {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    now >= not_after.saturating_sub(window)
}

/// Kubeconfig authenticating with a client certificate.
pub fn render(
    endpoint: &ClusterEndpoint,
    namespace: &str,
    cert_pem: &[u8],
    key_pem: &str,
) -> Result<String, AgentError> {
    let mut cluster = json!({ "server": endpoint.server });
    if let Some(ca) = &endpoint.certificate_authority_data {
        cluster["certificate-authority-data"] = json!(ca);
    }
    if endpoint.insecure_skip_tls_verify {
        cluster["insecure-skip-tls-verify"] = json!(true);
    }
    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": CLUSTER_NAME, "cluster": cluster }],
        "users": [{
            "name": USER_NAME,
            "user": {
                "client-certificate-data": STANDARD.encode(cert_pem),
                "client-key-data": STANDARD.encode(key_pem),
            }
        }],
        "contexts": [{
            "name": CONTEXT_NAME,
            "context": { "cluster": CLUSTER_NAME, "user": USER_NAME, "namespace": namespace }
        }],
        "current-context": CONTEXT_NAME,
    });
    Ok(serde_yaml::to_string(&kubeconfig)?)
}

/// Replace `path` with `contents` (mode 0600) through a temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AgentError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| AgentError::io("create directory", dir.display(), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| AgentError::io("create temp file in", dir.display(), e))?;
    tmp.write_all(contents)
        .map_err(|e| AgentError::io("write", tmp.path().display(), e))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(0o600))
        .map_err(|e| AgentError::io("chmod", tmp.path().display(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AgentError::io("sync", tmp.path().display(), e))?;
    tmp.persist(path)
        .map_err(|e| AgentError::io("rename to", path.display(), e.error))?;
    Ok(())
}
