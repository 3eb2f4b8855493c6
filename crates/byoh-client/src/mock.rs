//! Mock ByoHostClient for unit testing
//!
//! Stores hosts in memory and enforces the same optimistic concurrency rules
//! as the API server: replacing with a stale `resourceVersion` fails with a
//! conflict, and status writes never touch metadata or spec.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use crds::{ByoHost, ByoHostStatus, LabelSelector};
use kube::ResourceExt;

use crate::byoh_trait::ByoHostClientTrait;
use crate::error::ByohClientError;

type HostKey = (String, String);

/// Mock ByoHostClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockByoHostClient {
    hosts: Arc<Mutex<BTreeMap<HostKey, ByoHost>>>,
    // Monotonic resourceVersion source
    next_version: Arc<Mutex<u64>>,
    // Number of upcoming replace calls that fail with a conflict
    injected_conflicts: Arc<Mutex<u32>>,
    writes: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key_of(host: &ByoHost) -> Result<HostKey, ByohClientError> {
    let namespace = host.namespace().ok_or_else(|| {
        ByohClientError::InvalidRequest(format!("ByoHost {} has no namespace", host.name_any()))
    })?;
    Ok((namespace, host.name_any()))
}

impl MockByoHostClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        let mut version = lock(&self.next_version);
        *version += 1;
        version.to_string()
    }

    fn record_write(&self) {
        *lock(&self.writes) += 1;
    }

    /// Add a host to the mock store, keeping its status (for test setup)
    pub fn add_host(&self, mut host: ByoHost) -> ByoHost {
        let key = key_of(&host).unwrap_or_default();
        host.metadata.resource_version = Some(self.bump_version());
        if host.metadata.uid.is_none() {
            host.metadata.uid = Some(format!("uid-{}-{}", key.0, key.1));
        }
        lock(&self.hosts).insert(key, host.clone());
        host
    }

    /// Snapshot of a stored host
    pub fn host(&self, namespace: &str, name: &str) -> Option<ByoHost> {
        lock(&self.hosts)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next `count` replace calls fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *lock(&self.injected_conflicts) = count;
    }

    /// Number of successful writes (create, replace, status) so far
    pub fn write_count(&self) -> u64 {
        *lock(&self.writes)
    }
}

#[async_trait]
impl ByoHostClientTrait for MockByoHostClient {
    async fn list_hosts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ByoHost>, ByohClientError> {
        selector.validate()?;
        let hosts = lock(&self.hosts);
        let mut matched = Vec::new();
        for ((ns, _), host) in hosts.iter() {
            if ns == namespace && selector.matches(host.labels())? {
                matched.push(host.clone());
            }
        }
        Ok(matched)
    }

    async fn get_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ByoHost>, ByohClientError> {
        Ok(self.host(namespace, name))
    }

    async fn create_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError> {
        let key = key_of(host)?;
        let mut hosts = lock(&self.hosts);
        if hosts.contains_key(&key) {
            return Err(ByohClientError::Conflict(format!(
                "byohosts \"{}\" already exists",
                key.1
            )));
        }
        let mut created = host.clone();
        created.status = None;
        created.metadata.resource_version = Some(self.bump_version());
        created.metadata.uid = Some(format!("uid-{}-{}", key.0, key.1));
        hosts.insert(key, created.clone());
        drop(hosts);
        self.record_write();
        Ok(created)
    }

    async fn replace_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError> {
        let key = key_of(host)?;
        {
            let mut conflicts = lock(&self.injected_conflicts);
            if *conflicts > 0 {
                *conflicts -= 1;
                return Err(ByohClientError::Conflict(format!(
                    "injected conflict for {}/{}",
                    key.0, key.1
                )));
            }
        }

        let mut hosts = lock(&self.hosts);
        let stored = hosts
            .get_mut(&key)
            .ok_or_else(|| ByohClientError::NotFound(format!("ByoHost {}/{}", key.0, key.1)))?;
        if stored.metadata.resource_version != host.metadata.resource_version {
            return Err(ByohClientError::Conflict(format!(
                "the object has been modified; please apply your changes to the latest version ({}/{})",
                key.0, key.1
            )));
        }
        stored.metadata = host.metadata.clone();
        stored.spec = host.spec.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        let replaced = stored.clone();
        drop(hosts);
        self.record_write();
        Ok(replaced)
    }

    async fn patch_host_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ByoHostStatus,
    ) -> Result<ByoHost, ByohClientError> {
        let key = (namespace.to_string(), name.to_string());
        let mut hosts = lock(&self.hosts);
        let stored = hosts
            .get_mut(&key)
            .ok_or_else(|| ByohClientError::NotFound(format!("ByoHost {namespace}/{name}")))?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(self.bump_version());
        let patched = stored.clone();
        drop(hosts);
        self.record_write();
        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ByoHostSpec, CLUSTER_NAME_LABEL};
    use kube::api::ObjectMeta;

    fn host(name: &str, labels: &[(&str, &str)]) -> ByoHost {
        ByoHost {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: ByoHostSpec::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let client = MockByoHostClient::new();
        let stored = client.add_host(host("h1", &[]));

        let mut first = stored.clone();
        first
            .labels_mut()
            .insert(CLUSTER_NAME_LABEL.to_string(), "c1".to_string());
        client.replace_host(&first).await.unwrap();

        let mut second = stored;
        second
            .labels_mut()
            .insert(CLUSTER_NAME_LABEL.to_string(), "c2".to_string());
        let err = client.replace_host(&second).await.unwrap_err();
        assert!(err.is_conflict());

        let current = client.host("default", "h1").unwrap();
        assert_eq!(current.labels().get(CLUSTER_NAME_LABEL).unwrap(), "c1");
    }

    #[tokio::test]
    async fn test_list_filters_by_selector_and_namespace() {
        let client = MockByoHostClient::new();
        client.add_host(host("h1", &[("role", "worker")]));
        client.add_host(host("h2", &[("role", "worker"), (CLUSTER_NAME_LABEL, "c1")]));
        let mut other_ns = host("h3", &[("role", "worker")]);
        other_ns.metadata.namespace = Some("other".to_string());
        client.add_host(other_ns);

        let mut selector = LabelSelector::default();
        selector
            .match_labels
            .insert("role".to_string(), "worker".to_string());
        let selector = selector.without_label(CLUSTER_NAME_LABEL);

        let hosts = client.list_hosts("default", &selector).await.unwrap();
        let names: Vec<String> = hosts.iter().map(|h| h.name_any()).collect();
        assert_eq!(names, vec!["h1".to_string()]);
    }

    #[tokio::test]
    async fn test_status_patch_keeps_spec_and_labels() {
        let client = MockByoHostClient::new();
        client.add_host(host("h1", &[("role", "worker")]));
        let status = ByoHostStatus::default();
        let patched = client
            .patch_host_status("default", "h1", &status)
            .await
            .unwrap();
        assert_eq!(patched.labels().get("role").unwrap(), "worker");
        assert_eq!(client.write_count(), 1);

        let missing = client.patch_host_status("default", "nope", &status).await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let client = MockByoHostClient::new();
        client.create_host(&host("h1", &[])).await.unwrap();
        let err = client.create_host(&host("h1", &[])).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
