//! What the agent should do next for its host.
//!
//! A pure function of the host record and the local sentinels. The
//! bootstrap sentinel is the authority on whether the node is bootstrapped;
//! the status condition only mirrors it.

use crds::{ByoHost, K8S_NODE_BOOTSTRAP_SUCCEEDED, is_true};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Cleanup annotation present: tear the node down and release the host
    Release,
    /// No machine bound: idle and report host details
    AwaitMachine,
    /// Bound but the bootstrap data secret is not referenced yet
    AwaitBootstrapSecret,
    /// Installation required but the installer secret is not referenced yet
    AwaitInstallationSecret,
    /// Run the installer (unless already installed) and the bootstrap document
    Bootstrap { install: bool },
    /// Bootstrapped on disk but not reported yet
    ReportBootstrapped,
    /// Bootstrapped and reported
    Steady,
}

/// Local state the plan depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalState {
    pub bootstrapped: bool,
    pub installed: bool,
    pub skip_installation: bool,
}

pub fn plan(host: &ByoHost, local: LocalState) -> Step {
    if host.cleanup_requested() {
        return Step::Release;
    }
    if !host.is_bound() {
        return Step::AwaitMachine;
    }
    if local.bootstrapped {
        return if is_true(host.conditions(), K8S_NODE_BOOTSTRAP_SUCCEEDED) {
            Step::Steady
        } else {
            Step::ReportBootstrapped
        };
    }
    if host.spec.bootstrap_secret.is_none() {
        return Step::AwaitBootstrapSecret;
    }
    let install = !local.skip_installation && !local.installed;
    if install && host.spec.installation_secret.is_none() {
        return Step::AwaitInstallationSecret;
    }
    Step::Bootstrap { install }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{Condition, SecretReference};

    fn local(bootstrapped: bool, installed: bool, skip: bool) -> LocalState {
        LocalState {
            bootstrapped,
            installed,
            skip_installation: skip,
        }
    }

    #[test]
    fn test_unbound_host_waits() {
        let host = create_test_host("host-1");
        assert_eq!(plan(&host, local(false, false, false)), Step::AwaitMachine);
        // A sentinel from an earlier life does not matter until bound
        assert_eq!(plan(&host, local(true, true, false)), Step::AwaitMachine);
    }

    #[test]
    fn test_cleanup_wins() {
        let mut host = bound_host("host-1");
        mark_cleanup(&mut host);
        assert_eq!(plan(&host, local(true, true, false)), Step::Release);
        let mut unbound = create_test_host("host-1");
        mark_cleanup(&mut unbound);
        assert_eq!(plan(&unbound, local(false, false, false)), Step::Release);
    }

    #[test]
    fn test_bound_host_waits_for_secrets() {
        let mut host = bound_host("host-1");
        host.spec.bootstrap_secret = None;
        assert_eq!(plan(&host, local(false, false, false)), Step::AwaitBootstrapSecret);

        host.spec.bootstrap_secret = Some(SecretReference::new("m1-bootstrap", "default"));
        assert_eq!(plan(&host, local(false, false, false)), Step::AwaitInstallationSecret);
        assert_eq!(
            plan(&host, local(false, false, true)),
            Step::Bootstrap { install: false }
        );
        assert_eq!(
            plan(&host, local(false, true, false)),
            Step::Bootstrap { install: false }
        );

        host.spec.installation_secret = Some(SecretReference::new("m1-install", "default"));
        assert_eq!(
            plan(&host, local(false, false, false)),
            Step::Bootstrap { install: true }
        );
    }

    #[test]
    fn test_sentinel_is_authoritative() {
        let mut host = bound_host("host-1");
        assert_eq!(plan(&host, local(true, true, false)), Step::ReportBootstrapped);

        host.status
            .get_or_insert_with(Default::default)
            .conditions
            .push(Condition::true_condition(K8S_NODE_BOOTSTRAP_SUCCEEDED));
        assert_eq!(plan(&host, local(true, true, false)), Step::Steady);

        // Condition says bootstrapped but the sentinel is gone: run again
        host.spec.installation_secret = Some(SecretReference::new("m1-install", "default"));
        assert_eq!(
            plan(&host, local(false, false, false)),
            Step::Bootstrap { install: true }
        );
    }
}
