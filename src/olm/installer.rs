//! Operator Installer
//!
//! Drives one OLM operator from "not subscribed" to a succeeded CSV:
//!
//! ```text
//! NotSubscribed -> Subscribing -> AwaitingPackageManifest
//!     -> AwaitingInstallPlanApproval (Manual only) -> AwaitingCsv
//!     -> Succeeded | Failed
//! ```
//!
//! Nothing is cached between polls; every step re-reads live cluster state.

use super::package_manifest::{catalog_selector, PackageManifest, MARKETPLACE_NAMESPACE};
use crate::artifacts::ManifestStore;
use crate::config::ApprovalMode;
use crate::crd::{to_manifest, OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec};
use crate::document::{name_of, phase_of};
use crate::domain::ports::{ControlPlaneClient, ResourceKind};
use crate::error::Result;
use crate::plan::Version;
use crate::poll::{PollTarget, Poller, Probe};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

pub const PACKAGE_MANIFEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(300);
pub const CSV_APPEAR_TIMEOUT: Duration = Duration::from_secs(300);
pub const CSV_INSTALLING_TIMEOUT: Duration = Duration::from_secs(60);
pub const CSV_SUCCEEDED_TIMEOUT: Duration = Duration::from_secs(720);
pub const INSTALL_PLAN_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const ODF_OPERATOR: &str = "odf-operator";
pub const OCS_OPERATOR: &str = "ocs-operator";
pub const MCG_OPERATOR: &str = "mcg-operator";
pub const CSI_ADDONS_OPERATOR: &str = "odf-csi-addons-operator";

// =============================================================================
// Install State
// =============================================================================

/// Where one operator install currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    NotSubscribed,
    Subscribing,
    AwaitingPackageManifest,
    AwaitingInstallPlanApproval,
    AwaitingCsv,
    Succeeded,
    Failed(String),
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Succeeded | InstallState::Failed(_))
    }
}

// =============================================================================
// Request / Report
// =============================================================================

/// What to install and from where
#[derive(Debug, Clone)]
pub struct OperatorRequest {
    /// Package name; also the subscription name
    pub package: String,
    /// Namespace the subscription is created in
    pub namespace: String,
    /// Custom channel; the package default channel when unset
    pub channel: Option<String>,
    pub source: String,
    pub source_namespace: String,
    pub approval: ApprovalMode,
    /// Pin `startingCSV` to the channel's current CSV matching this pattern
    pub starting_csv_pattern: Option<String>,
}

impl OperatorRequest {
    pub fn new(package: impl Into<String>, namespace: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            namespace: namespace.into(),
            channel: None,
            source: source.into(),
            source_namespace: MARKETPLACE_NAMESPACE.to_string(),
            approval: ApprovalMode::Automatic,
            starting_csv_pattern: None,
        }
    }

    pub fn channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn approval(mut self, approval: ApprovalMode) -> Self {
        self.approval = approval;
        self
    }

    pub fn starting_csv(mut self, pattern: impl Into<String>) -> Self {
        self.starting_csv_pattern = Some(pattern.into());
        self
    }
}

/// Result of a finished install
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub package: String,
    pub channel: String,
    pub csv: String,
    pub history: Vec<InstallState>,
}

/// Operators that must reach `Succeeded` after the storage operator
/// subscription, in order
pub fn dependent_operators(ocs: Version, ocp: Version, live: bool) -> Vec<&'static str> {
    let mut names = if ocs >= Version::V4_9 {
        let mut names = vec![ODF_OPERATOR, OCS_OPERATOR, MCG_OPERATOR];
        // live 4.9 on OCP 4.10 ships without a separate mcg-operator CSV
        if live && ocp == Version::V4_10 && ocs == Version::V4_9 {
            names.retain(|n| *n != MCG_OPERATOR);
        }
        names
    } else {
        vec![OCS_OPERATOR]
    };
    if ocs >= Version::V4_10 {
        names.push(CSI_ADDONS_OPERATOR);
    }
    names
}

// =============================================================================
// Installer
// =============================================================================

pub struct OperatorInstaller<'a> {
    client: &'a dyn ControlPlaneClient,
    poller: &'a Poller,
    artifacts: &'a ManifestStore,
}

impl<'a> OperatorInstaller<'a> {
    pub fn new(client: &'a dyn ControlPlaneClient, poller: &'a Poller, artifacts: &'a ManifestStore) -> Self {
        Self {
            client,
            poller,
            artifacts,
        }
    }

    /// Subscribe to `request.package` and wait for its CSV to succeed
    pub async fn install(&self, request: &OperatorRequest) -> Result<InstallReport> {
        let mut history = vec![InstallState::NotSubscribed];
        match self.drive(request, &mut history).await {
            Ok((channel, csv)) => {
                history.push(InstallState::Succeeded);
                info!("Operator {} installed ({})", request.package, csv);
                Ok(InstallReport {
                    package: request.package.clone(),
                    channel,
                    csv,
                    history,
                })
            }
            Err(e) => {
                history.push(InstallState::Failed(e.to_string()));
                error!(
                    "Operator {} install failed after {:?}: {}",
                    request.package, history, e
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &OperatorRequest,
        history: &mut Vec<InstallState>,
    ) -> Result<(String, String)> {
        let package = request.package.as_str();
        let namespace = request.namespace.as_str();

        transition(history, package, InstallState::Subscribing);
        transition(history, package, InstallState::AwaitingPackageManifest);
        let manifest = PackageManifest::wait_for(
            self.client,
            self.poller,
            package,
            &catalog_selector(&request.source),
            PACKAGE_MANIFEST_TIMEOUT,
        )
        .await?;

        let channel = match &request.channel {
            Some(custom) => {
                info!("Custom channel will be used: {}", custom);
                custom.clone()
            }
            None => {
                let default = manifest.default_channel()?.to_string();
                info!("Default channel will be used: {}", default);
                default
            }
        };
        let starting_csv = request
            .starting_csv_pattern
            .as_deref()
            .map(|pattern| manifest.current_csv_matching(Some(&channel), pattern))
            .transpose()?;

        let subscription = to_manifest(
            Subscription::new(
                package,
                SubscriptionSpec {
                    name: package.to_string(),
                    channel: channel.clone(),
                    source: request.source.clone(),
                    source_namespace: request.source_namespace.clone(),
                    install_plan_approval: Some(request.approval.as_str().to_string()),
                    starting_csv,
                },
            ),
            Some(namespace),
        )?;
        self.artifacts.record("subscription_manifest", &subscription)?;
        self.client.create_if_absent(&subscription).await?;
        self.wait_for_subscription(namespace, package).await?;

        if request.approval == ApprovalMode::Manual {
            transition(history, package, InstallState::AwaitingInstallPlanApproval);
            self.approve_pending_install_plan(namespace).await?;
            let csv = manifest.current_csv(Some(&channel))?;
            self.wait_for_csv_phase(namespace, &csv, &["Installing", "Succeeded"], CSV_INSTALLING_TIMEOUT)
                .await?;
        }

        transition(history, package, InstallState::AwaitingCsv);
        let csv = self.wait_for_csv(namespace, package).await?;
        self.wait_for_csv_phase(namespace, &csv, &["Succeeded"], CSV_SUCCEEDED_TIMEOUT)
            .await?;
        Ok((channel, csv))
    }

    /// Wait for a subscription whose name contains `pattern`
    pub async fn wait_for_subscription(&self, namespace: &str, pattern: &str) -> Result<String> {
        self.wait_for_named(ResourceKind::Subscription, namespace, pattern, SUBSCRIPTION_TIMEOUT)
            .await
    }

    /// Wait for a CSV whose name contains `pattern`
    pub async fn wait_for_csv(&self, namespace: &str, pattern: &str) -> Result<String> {
        self.wait_for_named(ResourceKind::ClusterServiceVersion, namespace, pattern, CSV_APPEAR_TIMEOUT)
            .await
    }

    async fn wait_for_named(
        &self,
        kind: ResourceKind,
        namespace: &str,
        pattern: &str,
        timeout: Duration,
    ) -> Result<String> {
        let client = self.client;
        let target = PollTarget::new(kind.to_string(), pattern, "present");
        let found = self
            .poller
            .until(&target, POLL_INTERVAL, timeout, || async move {
                let items = client.list(kind, Some(namespace), None).await?;
                Ok(
                    match items.iter().map(name_of).find(|name| name.contains(pattern)) {
                        Some(name) => Probe::Ready(name.to_string()),
                        None => Probe::Pending(format!("{} {} objects", items.len(), kind)),
                    },
                )
            })
            .await?;
        info!("{} found: {}", kind, found);
        Ok(found)
    }

    /// Wait until CSV `name` reports one of `phases`
    pub async fn wait_for_csv_phase(
        &self,
        namespace: &str,
        name: &str,
        phases: &[&str],
        timeout: Duration,
    ) -> Result<()> {
        let client = self.client;
        let target = PollTarget::new("ClusterServiceVersion", name, phases.join("|"));
        self.poller
            .until(&target, POLL_INTERVAL, timeout, || async move {
                let csv = client
                    .get(ResourceKind::ClusterServiceVersion, Some(namespace), name)
                    .await?;
                let phase = phase_of(&csv);
                Ok(Probe::check(phases.contains(&phase), phase))
            })
            .await
    }

    /// Find exactly one unapproved install plan and approve it
    pub async fn approve_pending_install_plan(&self, namespace: &str) -> Result<String> {
        let client = self.client;
        let target = PollTarget::new("InstallPlan", namespace, "pending approval");
        let pending = self
            .poller
            .until(&target, POLL_INTERVAL, INSTALL_PLAN_TIMEOUT, || async move {
                let plans = client.list(ResourceKind::InstallPlan, Some(namespace), None).await?;
                Ok(
                    match plans
                        .iter()
                        .find(|p| p.pointer("/spec/approved") == Some(&Value::Bool(false)))
                    {
                        Some(plan) => Probe::Ready(name_of(plan).to_string()),
                        None => Probe::Pending(format!("{} install plans, none pending", plans.len())),
                    },
                )
            })
            .await?;

        info!("Approving install plan {}", pending);
        self.client
            .patch(
                ResourceKind::InstallPlan,
                Some(namespace),
                &pending,
                &json!({"spec": {"approved": true}}),
            )
            .await?;
        Ok(pending)
    }

    /// Wait for each dependent operator's current CSV to succeed
    pub async fn wait_for_operators(
        &self,
        namespace: &str,
        packages: &[&str],
        catalog: &str,
        channel: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut csvs = Vec::with_capacity(packages.len());
        for package in packages {
            let manifest = PackageManifest::wait_for(
                self.client,
                self.poller,
                package,
                &catalog_selector(catalog),
                PACKAGE_MANIFEST_TIMEOUT,
            )
            .await?;
            let csv = manifest.current_csv(channel)?;
            debug!("Waiting for dependent operator CSV {}", csv);
            self.wait_for_csv_phase(namespace, &csv, &["Succeeded"], CSV_SUCCEEDED_TIMEOUT)
                .await?;
            csvs.push(csv);
        }
        Ok(csvs)
    }

    // =========================================================================
    // Namespace / OperatorGroup
    // =========================================================================

    pub async fn ensure_namespace(&self, name: &str, labels: Value) -> Result<()> {
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name, "labels": labels}
        });
        self.artifacts.record("namespace_manifest", &namespace)?;
        self.client.create_if_absent(&namespace).await?;
        Ok(())
    }

    pub async fn ensure_operator_group(
        &self,
        namespace: &str,
        name: &str,
        target_namespaces: Vec<String>,
    ) -> Result<()> {
        let group = to_manifest(
            OperatorGroup::new(name, OperatorGroupSpec { target_namespaces }),
            Some(namespace),
        )?;
        self.artifacts.record("operator_group_manifest", &group)?;
        self.client.create_if_absent(&group).await?;
        Ok(())
    }

    /// Apply an arbitrary manifest and keep a copy of it
    pub async fn apply_recorded(&self, prefix: &str, manifest: &Value) -> Result<Value> {
        self.artifacts.record(prefix, manifest)?;
        self.client.apply(manifest).await
    }
}

fn transition(history: &mut Vec<InstallState>, package: &str, next: InstallState) {
    debug!("{}: {:?} -> {:?}", package, history.last(), next);
    history.push(next);
}


#[cfg(test)]
mod tests {
    use super::fixtures::{simulate_olm, store_csv};
    use super::*;
    use crate::olm::package_manifest::manifest_fixture;
    use crate::error::Error;
    use crate::testing::{Call, FakeClock, FakeControlPlane};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const NS: &str = "openshift-storage";

    struct Harness {
        client: FakeControlPlane,
        poller: Poller,
        clock: Arc<FakeClock>,
        artifacts: ManifestStore,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FakeClock::new());
        let client = FakeControlPlane::new();
        client.insert(manifest_fixture(
            "odf-operator",
            "redhat-operators",
            &[("stable-4.12", "odf-operator.v4.12.2")],
        ));
        Harness {
            client,
            poller: Poller::new(clock.clone()),
            clock,
            artifacts: ManifestStore::temporary().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_automatic_approval_never_touches_install_plans() {
        let h = harness();
        simulate_olm(&h.client, NS, "odf-operator.v4.12.2");
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        let report = installer
            .install(&OperatorRequest::new("odf-operator", NS, "redhat-operators"))
            .await
            .unwrap();

        assert_eq!(report.csv, "odf-operator.v4.12.2");
        assert_eq!(report.channel, "stable-4.12");
        assert!(!report.history.contains(&InstallState::AwaitingInstallPlanApproval));
        assert_eq!(report.history.last(), Some(&InstallState::Succeeded));
        assert!(h.client.calls_of(ResourceKind::InstallPlan).is_empty());

        let sub = h.client.object(ResourceKind::Subscription, Some(NS), "odf-operator").unwrap();
        assert_eq!(sub["spec"]["installPlanApproval"], "Automatic");
        assert_eq!(sub["spec"]["source"], "redhat-operators");
        assert_eq!(h.artifacts.written().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_approval_happens_before_csv_polling() {
        let h = harness();
        simulate_olm(&h.client, NS, "odf-operator.v4.12.2");
        // OLM finishes the install some time after approval
        h.client.on_call(|call, store| {
            if let Call::Get { kind: ResourceKind::ClusterServiceVersion, name } = call {
                let phase = store
                    .get(&(ResourceKind::ClusterServiceVersion, NS.to_string(), name.clone()))
                    .map(|csv| csv["status"]["phase"] == "Installing")
                    .unwrap_or(false);
                if phase {
                    store_csv(store, NS, name, "Succeeded");
                }
            }
        });
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        let report = installer
            .install(
                &OperatorRequest::new("odf-operator", NS, "redhat-operators")
                    .approval(ApprovalMode::Manual),
            )
            .await
            .unwrap();

        assert!(report.history.contains(&InstallState::AwaitingInstallPlanApproval));
        let calls = h.client.calls();
        let approvals: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Patch { kind: ResourceKind::InstallPlan, .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(approvals.len(), 1, "exactly one install plan approved");
        let first_csv_read = calls
            .iter()
            .position(|c| c.kind() == Some(ResourceKind::ClusterServiceVersion))
            .unwrap();
        assert!(approvals[0] < first_csv_read);

        let plan = h.client.object(ResourceKind::InstallPlan, Some(NS), "install-abcde").unwrap();
        assert_eq!(plan["spec"]["approved"], true);
    }

    #[tokio::test]
    async fn test_manual_without_pending_plan_times_out() {
        let h = harness();
        // Subscription appears but OLM never creates an install plan
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        let err = installer
            .install(
                &OperatorRequest::new("odf-operator", NS, "redhat-operators")
                    .approval(ApprovalMode::Manual),
            )
            .await
            .unwrap_err();

        assert_matches!(err, Error::ResourceWrongStatus { ref kind, .. } if kind == "InstallPlan");
        assert_eq!(h.clock.elapsed(), INSTALL_PLAN_TIMEOUT);
        assert!(h.client.calls_of(ResourceKind::ClusterServiceVersion).is_empty());
    }

    #[tokio::test]
    async fn test_starting_csv_and_custom_channel() {
        let h = harness();
        h.client.insert(manifest_fixture(
            "advanced-cluster-management",
            "redhat-operators",
            &[("release-2.6", "advanced-cluster-management.v2.6.3")],
        ));
        simulate_olm(&h.client, "open-cluster-management", "advanced-cluster-management.v2.6.3");
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        installer
            .install(
                &OperatorRequest::new(
                    "advanced-cluster-management",
                    "open-cluster-management",
                    "redhat-operators",
                )
                .channel(Some("release-2.6".into()))
                .starting_csv("advanced-cluster-management"),
            )
            .await
            .unwrap();

        let sub = h
            .client
            .object(
                ResourceKind::Subscription,
                Some("open-cluster-management"),
                "advanced-cluster-management",
            )
            .unwrap();
        assert_eq!(sub["spec"]["channel"], "release-2.6");
        assert_eq!(sub["spec"]["startingCSV"], "advanced-cluster-management.v2.6.3");
    }

    #[tokio::test]
    async fn test_csv_stuck_installing_times_out() {
        let h = harness();
        h.client.on_call(|call, store| {
            if matches!(call, Call::Create { kind: ResourceKind::Subscription, .. }) {
                store_csv(store, NS, "odf-operator.v4.12.2", "Installing");
            }
        });
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        let err = installer
            .install(&OperatorRequest::new("odf-operator", NS, "redhat-operators"))
            .await
            .unwrap_err();

        assert_matches!(
            err,
            Error::ResourceWrongStatus { ref expected, ref observed, .. }
                if expected == "Succeeded" && observed == "Installing"
        );
    }

    #[test]
    fn test_dependent_operators() {
        assert_eq!(
            dependent_operators(Version::new(4, 8), Version::new(4, 8), false),
            vec![OCS_OPERATOR]
        );
        assert_eq!(
            dependent_operators(Version::V4_9, Version::V4_10, true),
            vec![ODF_OPERATOR, OCS_OPERATOR]
        );
        assert_eq!(
            dependent_operators(Version::V4_10, Version::V4_10, false),
            vec![ODF_OPERATOR, OCS_OPERATOR, MCG_OPERATOR, CSI_ADDONS_OPERATOR]
        );
    }

    #[tokio::test]
    async fn test_wait_for_operators_in_order() {
        let h = harness();
        h.client.insert(manifest_fixture(
            "ocs-operator",
            "redhat-operators",
            &[("stable-4.12", "ocs-operator.v4.12.2")],
        ));
        h.client.insert(super::fixtures::csv(NS, "odf-operator.v4.12.2", "Succeeded"));
        h.client.insert(super::fixtures::csv(NS, "ocs-operator.v4.12.2", "Succeeded"));
        let installer = OperatorInstaller::new(&h.client, &h.poller, &h.artifacts);

        let csvs = installer
            .wait_for_operators(NS, &[ODF_OPERATOR, OCS_OPERATOR], "redhat-operators", None)
            .await
            .unwrap();
        assert_eq!(csvs, vec!["odf-operator.v4.12.2", "ocs-operator.v4.12.2"]);
    }
}
