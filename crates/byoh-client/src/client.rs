//! Kubernetes-backed ByoHost client

use async_trait::async_trait;
use crds::{ByoHost, ByoHostStatus, LabelSelector};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::{Value, json};
use tracing::debug;

use crate::byoh_trait::ByoHostClientTrait;
use crate::error::ByohClientError;

/// Status fields a merge patch must null out explicitly to clear them
const STATUS_FIELDS: [&str; 4] = ["machineRef", "conditions", "hostDetails", "network"];

/// ByoHost client talking to the API server
#[derive(Clone)]
pub struct ByoHostClient {
    client: Client,
}

impl std::fmt::Debug for ByoHostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByoHostClient").finish_non_exhaustive()
    }
}

impl ByoHostClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ByoHost> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(host: &ByoHost) -> Result<String, ByohClientError> {
    host.namespace().ok_or_else(|| {
        ByohClientError::InvalidRequest(format!("ByoHost {} has no namespace", host.name_any()))
    })
}

/// Build a merge patch body that replaces the whole status.
pub fn status_patch(status: &ByoHostStatus) -> Result<Value, ByohClientError> {
    let mut value = serde_json::to_value(status)?;
    if let Some(obj) = value.as_object_mut() {
        for field in STATUS_FIELDS {
            obj.entry(field).or_insert(Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}

#[async_trait]
impl ByoHostClientTrait for ByoHostClient {
    async fn list_hosts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ByoHost>, ByohClientError> {
        let query = selector.to_query()?;
        debug!(namespace = %namespace, selector = %query, "Listing ByoHosts");
        let mut params = ListParams::default();
        if !query.is_empty() {
            params = params.labels(&query);
        }
        Ok(self.api(namespace).list(&params).await?.items)
    }

    async fn get_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ByoHost>, ByohClientError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError> {
        let namespace = namespace_of(host)?;
        Ok(self
            .api(&namespace)
            .create(&PostParams::default(), host)
            .await?)
    }

    async fn replace_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError> {
        let namespace = namespace_of(host)?;
        if host.resource_version().is_none() {
            return Err(ByohClientError::InvalidRequest(format!(
                "ByoHost {}/{} has no resourceVersion",
                namespace,
                host.name_any()
            )));
        }
        Ok(self
            .api(&namespace)
            .replace(&host.name_any(), &PostParams::default(), host)
            .await?)
    }

    async fn patch_host_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ByoHostStatus,
    ) -> Result<ByoHost, ByohClientError> {
        let patch = status_patch(status)?;
        Ok(self
            .api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
