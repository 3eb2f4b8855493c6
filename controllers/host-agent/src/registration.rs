//! Host registration.
//!
//! Creates the agent's host record on first start and keeps the labels given
//! with `--label` on it. Labels are only added, never removed: the control
//! plane owns the binding labels.

use std::collections::BTreeMap;

use byoh_client::{ByoHostClientTrait, ByohClientError};
use crds::{ByoHost, ByoHostSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use crate::error::AgentError;

const MAX_REGISTER_ATTEMPTS: u32 = 5;

fn new_host(namespace: &str, hostname: &str, labels: &BTreeMap<String, String>) -> ByoHost {
    ByoHost {
        metadata: ObjectMeta {
            name: Some(hostname.to_string()),
            namespace: Some(namespace.to_string()),
            labels: (!labels.is_empty()).then(|| labels.clone()),
            ..Default::default()
        },
        spec: ByoHostSpec::default(),
        status: None,
    }
}

/// Add missing `labels` to `host`. Returns `true` if anything changed.
fn merge_labels(host: &mut ByoHost, labels: &BTreeMap<String, String>) -> bool {
    let current = host.metadata.labels.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (key, value) in labels {
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Make sure the host record exists and carries `labels`.
pub async fn register(
    hosts: &dyn ByoHostClientTrait,
    namespace: &str,
    hostname: &str,
    labels: &BTreeMap<String, String>,
) -> Result<ByoHost, AgentError> {
    for attempt in 1..=MAX_REGISTER_ATTEMPTS {
        let existing = match hosts.get_host(namespace, hostname).await? {
            Some(host) => host,
            None => match hosts.create_host(&new_host(namespace, hostname, labels)).await {
                Ok(created) => {
                    info!("Registered ByoHost {}/{}", namespace, hostname);
                    return Ok(created);
                }
                Err(e) if e.is_conflict() => {
                    debug!("ByoHost {}/{} created concurrently", namespace, hostname);
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
        };

        let mut updated = existing.clone();
        if !merge_labels(&mut updated, labels) {
            info!("ByoHost {}/{} already registered", namespace, hostname);
            return Ok(existing);
        }
        match hosts.replace_host(&updated).await {
            Ok(host) => {
                info!("Updated labels of ByoHost {}/{}", namespace, hostname);
                return Ok(host);
            }
            Err(e) if e.is_conflict() => debug!(
                "Conflict labelling ByoHost {}/{} (attempt {}/{})",
                namespace, hostname, attempt, MAX_REGISTER_ATTEMPTS
            ),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ByohClientError::Conflict(format!(
        "could not register ByoHost {}/{} after {} attempts",
        namespace, hostname, MAX_REGISTER_ATTEMPTS
    ))
    .into())
}
