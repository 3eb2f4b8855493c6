//! Reconciliation logic for the BYOH resources.
//!
//! - `byo_machine`: host matching, binding, installer config and provider ID
//! - `byo_cluster`: cluster finalizer and endpoint defaulting
//! - `installer_config`: install/uninstall script secrets
//! - `csr`: approval of host agent certificate requests
//! - `bootstrap_kubeconfig`: bootstrap tokens and kubeconfigs for new agents
//!
//! The bind protocol itself lives in `host_matcher` and only talks to the
//! [`ByoHostClientTrait`] seam so it can be exercised against the mock client.

pub mod bootstrap_kubeconfig;
pub mod byo_cluster;
pub mod byo_machine;
pub mod csr;
pub mod host_matcher;
pub mod installer_config;
pub mod provider_id;

#[cfg(test)]
mod bootstrap_kubeconfig_test;
#[cfg(test)]
mod byo_machine_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use byoh_client::ByoHostClientTrait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::events::EventType;
use rand::Rng;
use tracing::warn;

use crate::backoff::FibonacciBackoff;
use crate::config::ManagerConfig;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::remote::RemoteClusterTracker;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciles BYOH resources.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) host_client: Box<dyn ByoHostClientTrait + Send + Sync>,
    pub(crate) events: Box<dyn EventPublisher>,
    pub(crate) tracker: RemoteClusterTracker,
    pub(crate) installers: installer::Registry,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config: ManagerConfig,
    /// Backoff of resources whose last reconcile failed (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Client,
        host_client: impl ByoHostClientTrait + 'static,
        events: impl EventPublisher + 'static,
        metrics: Arc<Metrics>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            tracker: RemoteClusterTracker::new(client.clone()),
            client,
            host_client: Box::new(host_client),
            events: Box::new(events),
            installers: installer::Registry::builtin(),
            metrics,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Namespaced API handle for `K`.
    pub(crate) fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Record an event on `obj`. Never fails.
    pub(crate) async fn publish<K>(
        &self,
        obj: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), type_, reason, action, note)
            .await;
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.increment_error();
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (crate::backoff::MIN_BACKOFF_SECS, 0)
            }
        }
    }

    /// Forget the backoff of a resource after a successful reconcile,
    /// including the final one that removes its finalizer.
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}

const RANDOM_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random string of lowercase letters and digits.
pub(crate) fn random_lowercase_alnum<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
        .collect()
}

/// True if `s` consists of `len` lowercase letters and digits.
pub(crate) fn is_lowercase_alnum(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| RANDOM_ALPHABET.contains(&b))
}
