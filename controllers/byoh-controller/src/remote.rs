//! Workload cluster clients.
//!
//! A client per workload cluster is built from the `<cluster>-kubeconfig`
//! secret written by the Cluster API core controllers and cached until the
//! cluster is deleted.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use crds::SECRET_VALUE_KEY;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ControllerError;

/// Concurrent cache with a single writer per miss.
///
/// Readers clone the cached value under a shared lock. A miss takes the
/// exclusive lock, checks again, and builds the value while holding it, so
/// concurrent misses for the same key build once.
#[derive(Debug)]
pub struct ClientCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for ClientCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> ClientCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &K, build: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.entries.read().await.get(key) {
            return Ok(value.clone());
        }

        let mut entries = self.entries.write().await;
        if let Some(value) = entries.get(key) {
            return Ok(value.clone());
        }
        let value = build().await?;
        entries.insert(key.clone(), value.clone());
        Ok(value)
    }

    /// Drop the cached value; returns true if one was present.
    pub async fn evict(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Namespaced name of a Cluster API cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Name of the secret holding this cluster's admin kubeconfig.
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.name)
    }
}

/// Tracks clients for workload clusters managed from this cluster
pub struct RemoteClusterTracker {
    management: Client,
    cache: ClientCache<ClusterKey, Client>,
}

impl std::fmt::Debug for RemoteClusterTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClusterTracker").finish_non_exhaustive()
    }
}

impl RemoteClusterTracker {
    pub fn new(management: Client) -> Self {
        Self {
            management,
            cache: ClientCache::default(),
        }
    }

    /// Client for the workload cluster `namespace/name`.
    pub async fn client(&self, namespace: &str, name: &str) -> Result<Client, ControllerError> {
        let key = ClusterKey::new(namespace, name);
        self.cache
            .get_or_try_insert_with(&key, || self.build_client(&key))
            .await
    }

    /// Forget the client for a deleted cluster.
    pub async fn evict(&self, namespace: &str, name: &str) {
        if self.cache.evict(&ClusterKey::new(namespace, name)).await {
            info!("Evicted workload cluster client for {}/{}", namespace, name);
        }
    }

    async fn build_client(&self, key: &ClusterKey) -> Result<Client, ControllerError> {
        debug!("Building workload cluster client for {}/{}", key.namespace, key.name);
        let secrets: Api<Secret> = Api::namespaced(self.management.clone(), &key.namespace);
        let secret_name = key.kubeconfig_secret_name();
        let secret = secrets.get_opt(&secret_name).await?.ok_or_else(|| {
            ControllerError::MissingObject(format!(
                "kubeconfig secret {}/{}",
                key.namespace, secret_name
            ))
        })?;
        let raw = kubeconfig_from_secret(&secret).ok_or_else(|| {
            ControllerError::RemoteCluster(format!(
                "secret {}/{} has no {:?} key",
                key.namespace, secret_name, SECRET_VALUE_KEY
            ))
        })?;

        let kubeconfig = Kubeconfig::from_yaml(&raw)
            .map_err(|e| ControllerError::RemoteCluster(format!("parse kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ControllerError::RemoteCluster(format!("load kubeconfig: {}", e)))?;
        Client::try_from(config).map_err(ControllerError::from)
    }
}

#[cfg(test)]
impl RemoteClusterTracker {
    /// Use `client` for `namespace/name` instead of building one.
    pub async fn insert(&self, namespace: &str, name: &str, client: Client) {
        self.cache
            .entries
            .write()
            .await
            .insert(ClusterKey::new(namespace, name), client);
    }
}

fn kubeconfig_from_secret(secret: &Secret) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(SECRET_VALUE_KEY)?;
    String::from_utf8(bytes.0.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_cache_builds_once_per_key() {
        let cache: Arc<ClientCache<String, String>> = Arc::new(ClientCache::default());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_insert_with(&"c1".to_string(), || async {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok::<_, ControllerError>("client-c1".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "client-c1");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_eviction_and_failed_build() {
        let cache: ClientCache<String, u32> = ClientCache::default();
        let key = "c1".to_string();

        let err = cache
            .get_or_try_insert_with(&key, || async {
                Err::<u32, _>(ControllerError::RemoteCluster("down".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.len().await, 0);

        let v = cache
            .get_or_try_insert_with(&key, || async { Ok::<_, ControllerError>(1) })
            .await
            .unwrap();
        assert_eq!(v, 1);
        assert!(cache.evict(&key).await);
        assert!(!cache.evict(&key).await);

        let v = cache
            .get_or_try_insert_with(&key, || async { Ok::<_, ControllerError>(2) })
            .await
            .unwrap();
        assert_eq!(v, 2);
    }

    #[test]
    fn test_kubeconfig_secret_lookup() {
        let key = ClusterKey::new("default", "workload");
        assert_eq!(key.kubeconfig_secret_name(), "workload-kubeconfig");

        let secret = Secret {
            data: Some(BTreeMap::from([(
                SECRET_VALUE_KEY.to_string(),
                ByteString(b"apiVersion: v1".to_vec()),
            )])),
            ..Default::default()
        };
        assert_eq!(kubeconfig_from_secret(&secret).as_deref(), Some("apiVersion: v1"));
        assert_eq!(kubeconfig_from_secret(&Secret::default()), None);
    }
}
