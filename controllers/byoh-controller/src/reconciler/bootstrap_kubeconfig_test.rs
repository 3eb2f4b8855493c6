//! Unit tests for the BootstrapKubeconfig reconciler

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::{DateTime, Utc};
    use crds::BootstrapKubeconfigSpec;
    use kube::config::Kubeconfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use secrecy::ExposeSecret;

    use crate::reconciler::bootstrap_kubeconfig::*;

    fn ca_data() -> String {
        STANDARD.encode("-----BEGIN CERTIFICATE-----\nMIIBdummy\n-----END CERTIFICATE-----\n")
    }

    fn spec() -> BootstrapKubeconfigSpec {
        BootstrapKubeconfigSpec {
            apiserver: "https://10.0.0.1:6443".to_string(),
            certificate_authority_data: ca_data(),
            insecure_skip_tls_verify: None,
        }
    }

    #[test]
    fn test_generated_token_format() {
        let mut rng = StdRng::seed_from_u64(42);
        let token = BootstrapToken::generate(&mut rng);
        let exposed = token.expose();
        let (id, secret) = exposed.split_once('.').unwrap();
        assert_eq!(id.len(), 6);
        assert_eq!(secret.len(), 16);
        assert!(BootstrapToken::parse(&exposed).is_some());
        assert_eq!(token.secret_name(), format!("bootstrap-token-{}", id));
        assert!(!format!("{:?}", token).contains(secret));
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        for bad in [
            "abcdef",
            "abcdef.0123456789abcde",
            "ABCDEF.0123456789abcdef",
            "abcde.0123456789abcdef",
            "abcdef.0123456789abcdef.x",
        ] {
            assert!(BootstrapToken::parse(bad).is_none(), "{}", bad);
        }
        assert!(BootstrapToken::parse("abcdef.0123456789abcdef").is_some());
    }

    #[test]
    fn test_token_secret_contents() {
        let token = BootstrapToken::parse("abcdef.0123456789abcdef").unwrap();
        let now = DateTime::parse_from_rfc3339("2026-10-16T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let secret = token_secret(&token, Duration::from_secs(3600), now).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("bootstrap-token-abcdef"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some(TOKEN_NAMESPACE));
        assert_eq!(secret.type_.as_deref(), Some(TOKEN_SECRET_TYPE));
        let data = secret.string_data.unwrap();
        assert_eq!(data["token-id"], "abcdef");
        assert_eq!(data["token-secret"], "0123456789abcdef");
        assert_eq!(data["expiration"], "2026-10-16T10:00:00Z");
        assert_eq!(data["usage-bootstrap-authentication"], "true");
        assert_eq!(data["auth-extra-groups"], TOKEN_EXTRA_GROUPS);
    }

    #[test]
    fn test_rendered_kubeconfig_parses() {
        let token = BootstrapToken::parse("abcdef.0123456789abcdef").unwrap();
        let rendered = render_kubeconfig(&spec(), &token).unwrap();
        let kubeconfig = Kubeconfig::from_yaml(&rendered).unwrap();

        assert_eq!(kubeconfig.current_context.as_deref(), Some(KUBECONFIG_CONTEXT));
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(cluster.certificate_authority_data.as_deref(), Some(ca_data().as_str()));
        let user = kubeconfig.auth_infos[0].auth_info.as_ref().unwrap();
        assert_eq!(
            user.token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("abcdef.0123456789abcdef".to_string())
        );
    }

    #[test]
    fn test_insecure_kubeconfig_omits_ca() {
        let token = BootstrapToken::parse("abcdef.0123456789abcdef").unwrap();
        let insecure = BootstrapKubeconfigSpec {
            certificate_authority_data: String::new(),
            insecure_skip_tls_verify: Some(true),
            ..spec()
        };
        validate_spec(&insecure).unwrap();
        let kubeconfig = Kubeconfig::from_yaml(&render_kubeconfig(&insecure, &token).unwrap()).unwrap();
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.insecure_skip_tls_verify, Some(true));
        assert!(cluster.certificate_authority_data.is_none());
    }

    #[test]
    fn test_validate_spec_rejects_bad_input() {
        validate_spec(&spec()).unwrap();

        let http = BootstrapKubeconfigSpec {
            apiserver: "http://10.0.0.1:6443".to_string(),
            ..spec()
        };
        assert!(validate_spec(&http).is_err());

        let no_host = BootstrapKubeconfigSpec {
            apiserver: "https://".to_string(),
            ..spec()
        };
        assert!(validate_spec(&no_host).is_err());

        let not_base64 = BootstrapKubeconfigSpec {
            certificate_authority_data: "%%%".to_string(),
            ..spec()
        };
        assert!(validate_spec(&not_base64).is_err());

        let not_pem = BootstrapKubeconfigSpec {
            certificate_authority_data: STANDARD.encode("hello"),
            ..spec()
        };
        assert!(validate_spec(&not_pem).is_err());

        let missing_ca = BootstrapKubeconfigSpec {
            certificate_authority_data: String::new(),
            ..spec()
        };
        assert!(validate_spec(&missing_ca).is_err());
    }

    #[tokio::test]
    async fn test_reconcile_creates_token_then_renders_status() {
        use crate::events::reasons;
        use crate::test_utils::*;
        use crds::BootstrapKubeconfig;
        use serde_json::json;

        let mut bootstrap = BootstrapKubeconfig::new("bk", spec());
        bootstrap.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        let stored = serde_json::to_value(&bootstrap).unwrap();
        let (client, log) = fake_api_client(move |method, path| match (method, path) {
            ("POST", "/api/v1/namespaces/kube-system/secrets") => (
                201,
                json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "bootstrap-token-abcdef"}}),
            ),
            ("PATCH", "/apis/infrastructure.cluster.x-k8s.io/v1beta1/namespaces/default/bootstrapkubeconfigs/bk/status") => {
                (200, stored.clone())
            }
            _ => not_found(),
        });
        let (reconciler, events) =
            create_test_reconciler(client, byoh_client::MockByoHostClient::new());

        reconciler.reconcile_bootstrap_kubeconfig(&bootstrap).await.unwrap();

        let requests = log.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST "));
        assert!(requests[1].ends_with("/bk/status"));
        assert_eq!(
            events.reasons(),
            vec![reasons::BOOTSTRAP_TOKEN_CREATED.to_string()]
        );
    }

    #[tokio::test]
    async fn test_rendered_bootstrap_kubeconfig_is_left_alone() {
        use crate::test_utils::*;
        use crds::{BootstrapKubeconfig, BootstrapKubeconfigStatus};
        use kube_runtime::controller::Action;

        let mut bootstrap = BootstrapKubeconfig::new("bk", spec());
        bootstrap.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        let token = BootstrapToken::parse("abcdef.0123456789abcdef").unwrap();
        bootstrap.status = Some(BootstrapKubeconfigStatus {
            bootstrap_kubeconfig_data: Some(render_kubeconfig(&spec(), &token).unwrap()),
        });

        let (client, log) = fake_api_client(|_, _| not_found());
        let (reconciler, events) =
            create_test_reconciler(client, byoh_client::MockByoHostClient::new());

        let action = reconciler.reconcile_bootstrap_kubeconfig(&bootstrap).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(log.lock().unwrap().is_empty());
        assert!(events.reasons().is_empty());
    }
}
