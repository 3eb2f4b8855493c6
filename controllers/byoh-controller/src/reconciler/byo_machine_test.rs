//! Unit tests for the ByoMachine reconciler

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crds::machine_reasons::INSTALLATION_NOT_SUPPORTED;
    use crds::*;
    use kube::ResourceExt;

    use crate::reconciler::byo_machine::*;
    use crate::test_utils::*;

    #[test]
    fn test_preconditions_in_order() {
        let machine = create_test_machine("m1", None);
        let owner = create_test_capi_machine("m1", "workload", Some("m1-bootstrap"));

        let mut paused = create_test_cluster("workload", true);
        paused.spec.paused = true;
        assert_eq!(check_preconditions(&machine, &paused, &owner), Precondition::Paused);

        let not_ready = create_test_cluster("workload", false);
        assert_eq!(
            check_preconditions(&machine, &not_ready, &owner),
            Precondition::WaitingForInfrastructure
        );

        let cluster = create_test_cluster("workload", true);
        let no_secret = create_test_capi_machine("m1", "workload", None);
        assert_eq!(
            check_preconditions(&machine, &cluster, &no_secret),
            Precondition::WaitingForDataSecret
        );

        assert_eq!(
            check_preconditions(&machine, &cluster, &owner),
            Precondition::Ready("m1-bootstrap".to_string())
        );
    }

    #[test]
    fn test_paused_annotation_on_machine() {
        let mut machine = create_test_machine("m1", None);
        machine
            .annotations_mut()
            .insert(PAUSED_ANNOTATION.to_string(), String::new());
        let cluster = create_test_cluster("workload", true);
        let owner = create_test_capi_machine("m1", "workload", Some("s"));
        assert_eq!(check_preconditions(&machine, &cluster, &owner), Precondition::Paused);
    }

    #[test]
    fn test_installer_state() {
        let mut config = create_test_installer_config("m1", "m1");
        assert_eq!(installer_state(&config), InstallerState::Pending);

        let mut status = K8sInstallerConfigStatus::default();
        mark_false(
            &mut status.conditions,
            READY_CONDITION,
            INSTALLATION_NOT_SUPPORTED,
            ConditionSeverity::Error,
            "no installer for os Fedora 39 arch amd64",
        );
        config.status = Some(status);
        assert_eq!(
            installer_state(&config),
            InstallerState::Unsupported("no installer for os Fedora 39 arch amd64".to_string())
        );

        config.status = Some(K8sInstallerConfigStatus {
            ready: true,
            installation_secret: Some(SecretReference::new("m1", TEST_NAMESPACE)),
            conditions: Vec::new(),
        });
        assert_eq!(
            installer_state(&config),
            InstallerState::Ready(SecretReference::new("m1", TEST_NAMESPACE))
        );
    }

    #[test]
    fn test_build_installer_config_is_owned_by_machine() {
        let machine = create_test_machine("m1", None);
        let template = K8sInstallerConfigTemplate::new(
            "ubuntu",
            K8sInstallerConfigTemplateSpec {
                template: K8sInstallerConfigTemplateResource {
                    spec: K8sInstallerConfigSpec {
                        bundle_repo: "registry.local/byoh".to_string(),
                        bundle_type: "k8s".to_string(),
                    },
                },
            },
        );

        let config = build_installer_config(&machine, &template, "workload").unwrap();
        assert_eq!(config.name_any(), "m1");
        assert_eq!(config.namespace().as_deref(), Some(TEST_NAMESPACE));
        assert_eq!(config.spec.bundle_repo, "registry.local/byoh");
        assert_eq!(
            config.labels().get(CLUSTER_NAME_LABEL).map(String::as_str),
            Some("workload")
        );
        let owner = &config.owner_references()[0];
        assert_eq!(owner.kind, "ByoMachine");
        assert_eq!(owner.uid, "uid-m1");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_build_installer_config_requires_uid() {
        let mut machine = create_test_machine("m1", None);
        machine.metadata.uid = None;
        let template = K8sInstallerConfigTemplate::new("ubuntu", Default::default());
        assert!(build_installer_config(&machine, &template, "workload").is_err());
    }

    #[test]
    fn test_host_events_map_to_attached_machine() {
        let host = create_test_host("host-1", &[(ATTACHED_BYOMACHINE_LABEL, "team-a.m1")]);
        let target = machine_for_host(&host).unwrap();
        assert_eq!(target.name, "m1");
        assert_eq!(target.namespace.as_deref(), Some("team-a"));

        let mut free = create_test_host("host-2", &[]);
        free.metadata.labels = Some(BTreeMap::new());
        assert!(machine_for_host(&free).is_none());
    }

    #[tokio::test]
    async fn test_cleanup_requests_release_of_attached_host() {
        use crate::events::reasons;
        use crate::reconciler::host_matcher::{BindOutcome, BindRequest, bind_host};
        use byoh_client::MockByoHostClient;

        let hosts = MockByoHostClient::new();
        hosts.add_host(create_test_host("host-1", &[]));
        let machine = create_test_machine("m1", None);
        let request = BindRequest::new(
            &machine,
            "workload",
            SecretReference::new("m1-bootstrap", TEST_NAMESPACE),
            BTreeMap::new(),
        )
        .unwrap();
        assert!(matches!(
            bind_host(&hosts, &request).await.unwrap(),
            BindOutcome::Bound(_)
        ));

        let (client, log) = fake_api_client(|_, _| not_found());
        let (reconciler, events) = create_test_reconciler(client, hosts.clone());

        reconciler.cleanup_byo_machine(&machine).await.unwrap();
        let host = hosts.host(TEST_NAMESPACE, "host-1").unwrap();
        assert!(host.cleanup_requested());
        assert_eq!(
            events.reasons(),
            vec![reasons::HOST_CLEANUP_REQUESTED.to_string()]
        );

        // Already requested: no second event
        reconciler.cleanup_byo_machine(&machine).await.unwrap();
        assert_eq!(events.reasons().len(), 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_without_host_is_a_no_op() {
        let (client, _log) = fake_api_client(|_, _| not_found());
        let (reconciler, events) =
            create_test_reconciler(client, byoh_client::MockByoHostClient::new());
        reconciler
            .cleanup_byo_machine(&create_test_machine("m1", None))
            .await
            .unwrap();
        assert!(events.reasons().is_empty());
    }

    const MACHINE_PATH: &str = "/apis/infrastructure.cluster.x-k8s.io/v1beta1/namespaces/default/byomachines/m1";

    /// API responses for a Machine `m1` in Cluster `workload`
    fn cluster_api_response(method: &str, path: &str) -> Option<(u16, serde_json::Value)> {
        let value = match (method, path) {
            ("GET", "/apis/cluster.x-k8s.io/v1beta1/namespaces/default/machines/m1") => {
                serde_json::to_value(create_test_capi_machine("m1", "workload", Some("m1-bootstrap")))
            }
            ("GET", "/apis/cluster.x-k8s.io/v1beta1/namespaces/default/clusters/workload") => {
                serde_json::to_value(create_test_cluster("workload", true))
            }
            (
                "GET",
                "/apis/infrastructure.cluster.x-k8s.io/v1beta1/namespaces/default/byoclusters/workload",
            ) => serde_json::to_value(create_test_byo_cluster("workload", Some("workload"), 6443)),
            ("PATCH", p) if p.starts_with(MACHINE_PATH) => {
                serde_json::to_value(create_test_machine("m1", None))
            }
            _ => return None,
        };
        Some((200, value.unwrap()))
    }

    #[tokio::test]
    async fn test_apply_without_free_hosts_requeues() {
        use crate::events::reasons;
        use byoh_client::MockByoHostClient;
        use kube_runtime::controller::Action;
        use std::time::Duration;

        let (client, log) = fake_api_client(|method, path| {
            cluster_api_response(method, path).unwrap_or_else(not_found)
        });
        let (reconciler, events) = create_test_reconciler(client, MockByoHostClient::new());

        let action = reconciler
            .apply_byo_machine(&create_test_machine("m1", None))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert_eq!(NO_HOSTS_REQUEUE, Duration::from_secs(10));
        assert_eq!(events.reasons(), vec![reasons::HOSTS_UNAVAILABLE.to_string()]);
        let requests = log.lock().unwrap().clone();
        assert!(requests.contains(&format!("PATCH {}/status", MACHINE_PATH)));
    }

    #[tokio::test]
    async fn test_apply_with_bootstrapped_host_sets_provider_id() {
        use crate::events::reasons;
        use crate::reconciler::host_matcher::{BindRequest, bind_host};
        use byoh_client::MockByoHostClient;
        use kube_runtime::controller::Action;
        use serde_json::json;

        let hosts = MockByoHostClient::new();
        hosts.add_host(create_test_host("host-1", &[]));
        let machine = create_test_machine("m1", None);
        let request = BindRequest::new(
            &machine,
            "workload",
            SecretReference::new("m1-bootstrap", TEST_NAMESPACE),
            BTreeMap::new(),
        )
        .unwrap();
        bind_host(&hosts, &request).await.unwrap();
        let mut host = hosts.host(TEST_NAMESPACE, "host-1").unwrap();
        if let Some(status) = host.status.as_mut() {
            mark_true(&mut status.conditions, K8S_NODE_BOOTSTRAP_SUCCEEDED);
        }
        hosts.add_host(host);

        let (client, log) = fake_api_client(|method, path| {
            if let Some(response) = cluster_api_response(method, path) {
                return response;
            }
            match (method, path) {
                ("GET" | "PATCH", "/api/v1/nodes/host-1") => (
                    200,
                    json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "host-1"}, "spec": {}}),
                ),
                _ => not_found(),
            }
        });
        let (reconciler, events) = create_test_reconciler(client.clone(), hosts);
        reconciler.tracker.insert(TEST_NAMESPACE, "workload", client).await;

        let action = reconciler.apply_byo_machine(&machine).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(events.reasons(), vec![reasons::PROVIDER_ID_SET.to_string()]);

        let requests = log.lock().unwrap().clone();
        assert!(requests.contains(&"PATCH /api/v1/nodes/host-1".to_string()));
        assert!(requests.contains(&format!("PATCH {}", MACHINE_PATH)));
        assert_eq!(requests.last(), Some(&format!("PATCH {}/status", MACHINE_PATH)));
    }

    #[tokio::test]
    async fn test_apply_waits_for_host_of_deleted_predecessor() {
        use crate::reconciler::host_matcher::{BindRequest, bind_host};
        use byoh_client::MockByoHostClient;
        use kube_runtime::controller::Action;

        let hosts = MockByoHostClient::new();
        hosts.add_host(create_test_host("host-1", &[]));
        let predecessor = create_test_machine("m1", None);
        let request = BindRequest::new(
            &predecessor,
            "workload",
            SecretReference::new("m1-bootstrap", TEST_NAMESPACE),
            BTreeMap::new(),
        )
        .unwrap();
        bind_host(&hosts, &request).await.unwrap();

        let mut successor = create_test_machine("m1", None);
        successor.metadata.uid = Some("uid-m1-new".to_string());

        let (client, _log) = fake_api_client(|method, path| {
            cluster_api_response(method, path).unwrap_or_else(not_found)
        });
        let (reconciler, events) = create_test_reconciler(client, hosts.clone());

        let action = reconciler.apply_byo_machine(&successor).await.unwrap();
        assert_eq!(action, Action::requeue(NO_HOSTS_REQUEUE));
        assert!(events.reasons().is_empty());

        let host = hosts.host(TEST_NAMESPACE, "host-1").unwrap();
        assert_eq!(host.machine_ref().and_then(|r| r.uid.as_deref()), Some("uid-m1"));
        assert!(host.cleanup_requested());
    }
}
