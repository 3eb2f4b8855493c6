//! Integration tests for the ByoHost client
//!
//! These tests require a cluster with the BYOH CRDs installed and a
//! kubeconfig in the environment.

use byoh_client::{ByoHostClient, ByoHostClientTrait};
use crds::{CLUSTER_NAME_LABEL, LabelSelector};

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_list_unbound_hosts() {
    let namespace = std::env::var("BYOH_TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create kube client");
    let client = ByoHostClient::new(client);

    let selector = LabelSelector::default().without_label(CLUSTER_NAME_LABEL);
    let hosts = client
        .list_hosts(&namespace, &selector)
        .await
        .expect("Failed to list hosts");

    for host in &hosts {
        assert!(!host.is_bound(), "unbound selector returned a bound host");
    }
    println!("Found {} unbound hosts", hosts.len());
}

#[tokio::test]
#[ignore]
async fn test_get_missing_host() {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create kube client");
    let client = ByoHostClient::new(client);

    let host = client
        .get_host("default", "byoh-integration-does-not-exist")
        .await
        .expect("Failed to get host");
    assert!(host.is_none());
}
