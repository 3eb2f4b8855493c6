//! Secret access for bootstrap data and installer scripts

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

use crate::error::AgentError;

/// Reads secret payloads referenced from the host record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Data of the secret, `None` if it does not exist
    async fn read(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, AgentError>;
}

#[derive(Clone)]
pub struct KubeSecretReader {
    client: Client,
}

impl std::fmt::Debug for KubeSecretReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretReader").finish_non_exhaustive()
    }
}

impl KubeSecretReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, AgentError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect();
        // stringData is write-only on the server, but fake clusters may echo it
        for (key, value) in secret.string_data.unwrap_or_default() {
            data.entry(key).or_insert_with(|| value.into_bytes());
        }
        Ok(Some(data))
    }
}

/// UTF-8 payload of `key`, or `SecretUnavailable` naming the secret.
pub fn text_value(
    data: &BTreeMap<String, Vec<u8>>,
    key: &str,
    secret: &str,
) -> Result<String, AgentError> {
    let bytes = data
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AgentError::SecretUnavailable(format!("{} (key {:?})", secret, key)))?;
    String::from_utf8(bytes.clone())
        .map_err(|_| AgentError::SecretUnavailable(format!("{} (key {:?} is not UTF-8)", secret, key)))
}
