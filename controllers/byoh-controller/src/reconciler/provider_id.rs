//! Provider IDs for workload cluster nodes
//!
//! Format: `byoh://<hostname>/<6 lowercase alphanumerics>`. The random suffix
//! keeps a re-registered host from reusing the ID of its previous node.

use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::Api;
use rand::Rng;
use serde_json::json;
use tracing::info;

use super::{Reconciler, is_lowercase_alnum, random_lowercase_alnum};
use crate::error::ControllerError;

pub const PROVIDER_ID_SCHEME: &str = "byoh://";

const SUFFIX_LEN: usize = 6;

/// New provider ID for `hostname`.
pub fn generate<R: Rng + ?Sized>(rng: &mut R, hostname: &str) -> String {
    format!(
        "{}{}/{}",
        PROVIDER_ID_SCHEME,
        hostname,
        random_lowercase_alnum(rng, SUFFIX_LEN)
    )
}

/// Split a provider ID into hostname and suffix.
pub fn parse(provider_id: &str) -> Option<(&str, &str)> {
    let rest = provider_id.strip_prefix(PROVIDER_ID_SCHEME)?;
    let (hostname, suffix) = rest.rsplit_once('/')?;
    (!hostname.is_empty() && is_lowercase_alnum(suffix, SUFFIX_LEN)).then_some((hostname, suffix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderIdAction {
    /// The node already carries a valid ID for this host
    Keep(String),
    /// The node has no ID; write this one
    Assign(String),
}

/// Decide what to do with the provider ID currently on a node.
pub fn resolve<R: Rng + ?Sized>(
    rng: &mut R,
    hostname: &str,
    existing: Option<&str>,
) -> Result<ProviderIdAction, ControllerError> {
    match existing.filter(|id| !id.is_empty()) {
        None => Ok(ProviderIdAction::Assign(generate(rng, hostname))),
        Some(id) => match parse(id) {
            Some((host, _)) if host.eq_ignore_ascii_case(hostname) => {
                Ok(ProviderIdAction::Keep(id.to_string()))
            }
            Some(_) => Err(ControllerError::ProviderId(format!(
                "node {} carries provider ID {} of another host",
                hostname, id
            ))),
            None => Err(ControllerError::ProviderId(format!(
                "node {} carries malformed provider ID {}",
                hostname, id
            ))),
        },
    }
}

impl Reconciler {
    /// Make sure the workload cluster node for `hostname` has a provider ID
    /// and return it.
    pub(crate) async fn ensure_provider_id(
        &self,
        namespace: &str,
        cluster_name: &str,
        hostname: &str,
    ) -> Result<String, ControllerError> {
        let remote = self.tracker.client(namespace, cluster_name).await?;
        let nodes: Api<Node> = Api::all(remote);
        let node = nodes.get_opt(hostname).await?.ok_or_else(|| {
            ControllerError::NodeNotFound(format!(
                "node {} not found in workload cluster {}/{}",
                hostname, namespace, cluster_name
            ))
        })?;

        let existing = node.spec.as_ref().and_then(|s| s.provider_id.as_deref());
        let action = resolve(&mut rand::thread_rng(), hostname, existing)?;
        match action {
            ProviderIdAction::Keep(id) => Ok(id),
            ProviderIdAction::Assign(id) => {
                info!("Setting provider ID {} on node {}", id, hostname);
                nodes
                    .patch(
                        hostname,
                        &PatchParams::default(),
                        &Patch::Merge(&json!({"spec": {"providerID": id}})),
                    )
                    .await?;
                Ok(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_generated_ids_parse_back() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = generate(&mut rng, "host-1");
        let (host, suffix) = parse(&id).unwrap();
        assert_eq!(host, "host-1");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_resolve_assigns_when_missing() {
        let mut rng = StdRng::seed_from_u64(1);
        for existing in [None, Some("")] {
            let action = resolve(&mut rng, "host-1", existing).unwrap();
            assert!(matches!(action, ProviderIdAction::Assign(ref id) if id.starts_with("byoh://host-1/")));
        }
    }

    #[test]
    fn test_resolve_keeps_valid_id_for_same_host() {
        let mut rng = StdRng::seed_from_u64(1);
        let action = resolve(&mut rng, "host-1", Some("byoh://host-1/a1b2c3")).unwrap();
        assert_eq!(action, ProviderIdAction::Keep("byoh://host-1/a1b2c3".to_string()));
    }

    #[test]
    fn test_resolve_rejects_foreign_and_malformed_ids() {
        let mut rng = StdRng::seed_from_u64(1);
        for bad in [
            "byoh://host-2/a1b2c3",
            "aws:///us-east-1a/i-123",
            "byoh://host-1/ABCDEF",
            "byoh://host-1/abc",
        ] {
            let err = resolve(&mut rng, "host-1", Some(bad)).unwrap_err();
            assert!(matches!(err, ControllerError::ProviderId(_)), "{}", bad);
            assert!(!err.is_transient());
        }
    }
}
