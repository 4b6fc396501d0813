//! Multi-cluster DR deployment, driven from the ACM hub
//!
//! Hub resources are created and observed ready before any managed cluster
//! is touched: DR namespace everywhere, the ODF multicluster orchestrator,
//! the DR hub operator, then (for RBD) mirroring and the metadata store,
//! the DRPolicy and finally Ramen's deployment automation flag.

use super::metadata_store::MetadataStore;
use super::ramen::{self, profile_for, s3_profiles, RAMEN_HUB_CONFIG};
use super::rbd::{RbdDrOps, EXPECTED_SIDECAR_CONTAINERS};
use super::{DrConfiguration, DrScope, DR_NAMESPACE};
use crate::cluster::ClusterOps;
use crate::crd::dr::{DRPolicy, DRPolicySpec, DrClusterEntry};
use crate::crd::to_manifest;
use crate::deploy::pods::wait_for_deployment;
use crate::document::name_of;
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::olm::OperatorRequest;
use crate::plan::{DeploymentPlan, DrPlan};
use crate::poll::{PollTarget, Probe};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const MCO_PACKAGE: &str = "odf-multicluster-orchestrator";
pub const MCO_CONTROLLER: &str = "odfmo-controller-manager";
pub const OPENSHIFT_OPERATORS: &str = "openshift-operators";
pub const DR_HUB_PACKAGE: &str = "odr-hub-operator";
pub const DR_OPERATOR_GROUP: &str = "openshift-dr-system-group";
pub const DR_POLICY_NAME: &str = "odr-policy-5m";
pub const SCHEDULING_INTERVAL: &str = "5m";

const MCO_CONTROLLER_TIMEOUT: Duration = Duration::from_secs(600);
const POLICY_TIMEOUT: Duration = Duration::from_secs(600);
const POLICY_INTERVAL: Duration = Duration::from_secs(3);

/// What a finished DR deployment left behind
#[derive(Debug, Clone)]
pub struct DrReport {
    pub configuration: DrConfiguration,
    /// S3 secrets copied to the managed clusters
    pub secrets: Vec<String>,
    /// Rendered Ramen hub config that was applied
    pub ramen_config: PathBuf,
}

pub struct MultiClusterDrDeployer<'a> {
    scope: DrScope<'a>,
    plan: &'a DeploymentPlan,
    source: String,
    config: DrConfiguration,
    metadata_store: MetadataStore,
    expected_sidecars: usize,
}

impl std::fmt::Debug for MultiClusterDrDeployer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiClusterDrDeployer")
            .field("plan", &self.plan)
            .field("source", &self.source)
            .field("config", &self.config)
            .field("metadata_store", &self.metadata_store)
            .field("expected_sidecars", &self.expected_sidecars)
            .finish_non_exhaustive()
    }
}

impl<'a> MultiClusterDrDeployer<'a> {
    /// Fails straight away when the metadata store cannot be deployed
    pub fn new(
        scope: DrScope<'a>,
        plan: &'a DeploymentPlan,
        dr: &DrPlan,
        source: impl Into<String>,
    ) -> Result<Self> {
        let config = DrConfiguration::new(dr, scope.registry)?;
        let metadata_store = MetadataStore::new(config.metadata_store)?;
        Ok(Self {
            scope,
            plan,
            source: source.into(),
            config,
            metadata_store,
            expected_sidecars: EXPECTED_SIDECAR_CONTAINERS,
        })
    }

    pub fn expected_sidecars(mut self, count: usize) -> Self {
        self.expected_sidecars = count;
        self
    }

    pub fn configuration(&self) -> &DrConfiguration {
        &self.config
    }

    pub async fn deploy(mut self) -> Result<DrReport> {
        let registry = self.scope.registry;
        let hub_handle = registry.hub()?;
        let _hub_scope = registry.enter(hub_handle.index())?;
        let hub = ClusterOps::new(&hub_handle, self.scope.poller, self.scope.artifacts);
        info!(
            "Deploying Regional DR from {} for {} ({} metadata store)",
            hub.cluster,
            self.config.clusters.join(", "),
            self.config.metadata_store
        );

        self.create_dr_namespace().await?;
        self.install_orchestrator(&hub).await?;
        hub.installer()
            .ensure_operator_group(DR_NAMESPACE, DR_OPERATOR_GROUP, Vec::new())
            .await?;
        self.install_hub_operator(&hub).await?;

        let mut secrets = Vec::new();
        if self.config.rbd {
            let peer = RbdDrOps::new(
                &self.config,
                self.scope,
                &self.plan.namespace,
                &self.plan.storage_cluster_name,
            )
            .expected_sidecars(self.expected_sidecars)
            .deploy(&hub)
            .await?;
            self.config.mirror_peers.push(peer);
            secrets = self.metadata_store.configure(&self.scope, &hub).await?;
        }

        let policy = self.create_dr_policy(&hub).await?;
        self.wait_for_dr_policy(&hub, &policy).await?;
        self.config.policy_name = Some(policy);

        let ramen_config = self.enable_ramen_automation(&hub).await?;
        info!("Regional DR deployed with policy {}", DR_POLICY_NAME);
        Ok(DrReport {
            configuration: self.config,
            secrets,
            ramen_config,
        })
    }

    async fn create_dr_namespace(&self) -> Result<()> {
        let DrScope {
            registry,
            poller,
            artifacts,
        } = self.scope;
        registry
            .for_each(registry.all(), move |handle| async move {
                let ops = ClusterOps::new(&handle, poller, artifacts);
                ops.installer().ensure_namespace(DR_NAMESPACE, json!({})).await
            })
            .await?;
        Ok(())
    }

    async fn install_orchestrator(&self, hub: &ClusterOps<'_>) -> Result<()> {
        let request = OperatorRequest::new(MCO_PACKAGE, OPENSHIFT_OPERATORS, self.source.as_str())
            .channel(self.plan.subscription.channel.clone())
            .starting_csv(MCO_PACKAGE);
        let report = hub.installer().install(&request).await?;
        info!("Multicluster orchestrator {} installed from {}", report.csv, report.channel);
        wait_for_deployment(hub, OPENSHIFT_OPERATORS, MCO_CONTROLLER, MCO_CONTROLLER_TIMEOUT).await
    }

    async fn install_hub_operator(&self, hub: &ClusterOps<'_>) -> Result<()> {
        let request = OperatorRequest::new(DR_HUB_PACKAGE, DR_NAMESPACE, self.source.as_str())
            .channel(self.plan.subscription.channel.clone())
            .starting_csv(DR_HUB_PACKAGE);
        let report = hub.installer().install(&request).await?;
        info!("DR hub operator {} installed", report.csv);
        Ok(())
    }

    /// DRPolicy pairing every managed cluster with the S3 profile that
    /// mentions it
    pub fn dr_policy(&self, config_map: &Value) -> Result<Value> {
        let profiles = s3_profiles(config_map)?;
        let entries = self
            .config
            .clusters
            .iter()
            .map(|cluster| {
                let profile = profile_for(&profiles, cluster).ok_or_else(|| {
                    Error::DrDeployment(format!(
                        "no s3 profile in {} matches cluster {}",
                        RAMEN_HUB_CONFIG, cluster
                    ))
                })?;
                Ok(DrClusterEntry {
                    name: cluster.clone(),
                    region: cluster.clone(),
                    s3_profile_name: profile.name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        to_manifest(
            DRPolicy::new(
                DR_POLICY_NAME,
                DRPolicySpec {
                    dr_cluster_set: entries,
                    scheduling_interval: SCHEDULING_INTERVAL.to_string(),
                },
            ),
            None,
        )
    }

    async fn create_dr_policy(&self, hub: &ClusterOps<'_>) -> Result<String> {
        let config_map = hub
            .client
            .get(ResourceKind::ConfigMap, Some(DR_NAMESPACE), RAMEN_HUB_CONFIG)
            .await?;
        let policy = self.dr_policy(&config_map)?;
        hub.artifacts.record("dr_policy_hub", &policy)?;
        hub.client.create_if_absent(&policy).await?;
        Ok(name_of(&policy).to_string())
    }

    async fn wait_for_dr_policy(&self, hub: &ClusterOps<'_>, name: &str) -> Result<()> {
        let client = hub.client;
        let target = PollTarget::new("DRPolicy", name, "Succeeded");
        hub.poller
            .until(&target, POLICY_INTERVAL, POLICY_TIMEOUT, || async move {
                let doc = client.get(ResourceKind::DrPolicy, None, name).await?;
                let policy: DRPolicy = serde_json::from_value(doc)?;
                let reason = policy.first_reason();
                Ok(Probe::check(reason == "Succeeded", reason))
            })
            .await?;
        info!("DRPolicy {} Succeeded", name);
        Ok(())
    }

    async fn enable_ramen_automation(&self, hub: &ClusterOps<'_>) -> Result<PathBuf> {
        let config_map = hub
            .client
            .get(ResourceKind::ConfigMap, Some(DR_NAMESPACE), RAMEN_HUB_CONFIG)
            .await?;
        let merged = ramen::enable_deployment_automation(&config_map)?;
        let path = hub
            .artifacts
            .write_text("ramen_hub_config", "yaml", &ramen::render(&merged)?)?;
        hub.client.apply(&merged).await?;
        info!("Ramen deployment automation enabled on {}", hub.cluster);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::dr::fixtures::{provisioner_pods, DrFixture};
    use crate::dr::rbd::{RBD_MIRROR_SELECTOR, TOKEN_EXCHANGE_SELECTOR};
    use crate::olm::installer::fixtures::simulate_olm;
    use crate::olm::package_manifest::manifest_fixture;
    use crate::templates;
    use crate::testing::{pod, Call, FakeControlPlane};
    use assert_matches::assert_matches;
    use serde_yaml::Value as Yaml;

    const STORAGE_NS: &str = "openshift-storage";
    const SOURCE: &str = "redhat-operators";

    fn plan() -> DeploymentPlan {
        let config = RunConfig::from_yaml("deployment:\n  ocs_csv_channel: stable-4.12\n").unwrap();
        DeploymentPlan::from_config(&config).unwrap()
    }

    fn dr_plan(rbd: bool, store: &str) -> DrPlan {
        DrPlan {
            rbd,
            metadata_store: store.into(),
        }
    }

    fn seed_hub(hub: &FakeControlPlane) {
        hub.insert(manifest_fixture(
            MCO_PACKAGE,
            SOURCE,
            &[("stable-4.12", "odf-multicluster-orchestrator.v4.12.0")],
        ));
        hub.insert(manifest_fixture(DR_HUB_PACKAGE, SOURCE, &[("stable-4.12", "odr-hub-operator.v4.12.0")]));
        simulate_olm(hub, OPENSHIFT_OPERATORS, "odf-multicluster-orchestrator.v4.12.0");
        simulate_olm(hub, DR_NAMESPACE, "odr-hub-operator.v4.12.0");
        hub.insert(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": MCO_CONTROLLER, "namespace": OPENSHIFT_OPERATORS},
            "status": {"availableReplicas": 1}
        }));
        hub.on_call(|call, store| match call {
            Call::Create { kind: ResourceKind::MirrorPeer, name } => {
                if let Some(peer) = store.get_mut(&(ResourceKind::MirrorPeer, String::new(), name.clone())) {
                    peer["status"] = json!({"phase": "ExchangedSecret"});
                }
            }
            Call::Create { kind: ResourceKind::DrPolicy, name } => {
                if let Some(policy) = store.get_mut(&(ResourceKind::DrPolicy, String::new(), name.clone())) {
                    policy["status"] = json!({"conditions": [{"type": "Validated", "reason": "Succeeded"}]});
                }
            }
            _ => {}
        });
    }

    fn seed_managed(client: &FakeControlPlane, name: &str) {
        let label = |selector: &str| {
            let (key, value) = selector.split_once('=').unwrap();
            json!({ key: value })
        };
        client.insert(pod(STORAGE_NS, &format!("token-exchange-agent-{}", name), label(TOKEN_EXCHANGE_SELECTOR), "Running"));
        client.insert(pod(STORAGE_NS, &format!("rook-ceph-rbd-mirror-{}", name), label(RBD_MIRROR_SELECTOR), "Running"));
        client.insert(json!({
            "apiVersion": "ceph.rook.io/v1",
            "kind": "CephBlockPool",
            "metadata": {"name": "ocs-storagecluster-cephblockpool", "namespace": STORAGE_NS},
            "spec": {"mirroring": {"enabled": true}}
        }));
        provisioner_pods(client, 8);
    }

    #[tokio::test]
    async fn test_rbd_dr_end_to_end() {
        let fx = DrFixture::new();
        seed_hub(&fx.hub);
        seed_managed(&fx.east, "east");
        seed_managed(&fx.west, "west");
        let registry = fx.registry();
        let before = registry.current_index();
        let plan = plan();

        let report = MultiClusterDrDeployer::new(fx.scope(&registry), &plan, &dr_plan(true, "awss3"), SOURCE)
            .unwrap()
            .deploy()
            .await
            .unwrap();

        assert_eq!(registry.current_index(), before);
        for client in [&fx.hub, &fx.east, &fx.west] {
            assert!(client.created(ResourceKind::Namespace).contains(&DR_NAMESPACE.to_string()));
        }

        let subscription = fx
            .hub
            .object(ResourceKind::Subscription, Some(OPENSHIFT_OPERATORS), MCO_PACKAGE)
            .unwrap();
        assert_eq!(subscription["spec"]["startingCSV"], "odf-multicluster-orchestrator.v4.12.0");
        assert_eq!(subscription["spec"]["channel"], "stable-4.12");
        assert!(fx
            .hub
            .object(ResourceKind::Subscription, Some(DR_NAMESPACE), DR_HUB_PACKAGE)
            .is_some());

        assert_eq!(fx.hub.created(ResourceKind::MirrorPeer), vec!["mirrorpeer-east-west".to_string()]);
        let policy = fx.hub.object(ResourceKind::DrPolicy, None, DR_POLICY_NAME).unwrap();
        assert_eq!(policy["spec"]["drClusterSet"][0]["name"], "east");
        assert_eq!(policy["spec"]["drClusterSet"][0]["s3ProfileName"], "s3profile-east");
        assert_eq!(policy["spec"]["drClusterSet"][1]["s3ProfileName"], "s3profile-west");
        assert_eq!(policy["spec"]["schedulingInterval"], SCHEDULING_INTERVAL);

        assert!(fx.east.object(ResourceKind::Secret, Some(DR_NAMESPACE), "ramen-s3-secret-west").is_some());
        assert_eq!(report.secrets, vec!["ramen-s3-secret-east", "ramen-s3-secret-west"]);
        assert_eq!(report.configuration.mirror_peers, vec!["mirrorpeer-east-west"]);
        assert_eq!(report.configuration.policy_name.as_deref(), Some(DR_POLICY_NAME));

        let applied = fx
            .hub
            .object(ResourceKind::ConfigMap, Some(DR_NAMESPACE), RAMEN_HUB_CONFIG)
            .unwrap();
        let ramen: Yaml = serde_yaml::from_str(applied["data"][ramen::RAMEN_CONFIG_KEY].as_str().unwrap()).unwrap();
        assert_eq!(ramen["drClusterOperator"]["deploymentAutomationEnabled"], Yaml::Bool(true));
        let rendered = std::fs::read_to_string(&report.ramen_config).unwrap();
        assert!(rendered.contains("ramen_manager_config.yaml: |"));
    }

    #[tokio::test]
    async fn test_without_rbd_skips_mirroring() {
        let fx = DrFixture::new();
        seed_hub(&fx.hub);
        seed_managed(&fx.east, "east");
        seed_managed(&fx.west, "west");
        let registry = fx.registry();
        let plan = plan();

        MultiClusterDrDeployer::new(fx.scope(&registry), &plan, &dr_plan(false, "awss3"), SOURCE)
            .unwrap()
            .deploy()
            .await
            .unwrap();

        // Without RBD the managed clusters only get the DR namespace
        assert!(fx.hub.created(ResourceKind::MirrorPeer).is_empty());
        assert_eq!(fx.east.created(ResourceKind::Namespace), vec![DR_NAMESPACE.to_string()]);
        assert!(fx.east.created(ResourceKind::Secret).is_empty());
        assert_eq!(fx.hub.created(ResourceKind::DrPolicy), vec![DR_POLICY_NAME.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_s3_profile_fails_before_policy() {
        let fx = DrFixture::new();
        seed_hub(&fx.hub);
        fx.hub.insert(templates::load(templates::RAMEN_HUB_CONFIG).unwrap());
        let registry = fx.registry();
        let plan = plan();

        let err = MultiClusterDrDeployer::new(fx.scope(&registry), &plan, &dr_plan(false, "awss3"), SOURCE)
            .unwrap()
            .deploy()
            .await
            .unwrap_err();

        assert_matches!(err, Error::DrDeployment(ref msg) if msg.contains("east"));
        assert!(fx.hub.calls_of(ResourceKind::DrPolicy).is_empty());
    }

    #[tokio::test]
    async fn test_mcg_store_rejected_before_any_call() {
        let fx = DrFixture::new();
        let registry = fx.registry();
        let plan = plan();

        let result = MultiClusterDrDeployer::new(fx.scope(&registry), &plan, &dr_plan(true, "mcg"), SOURCE);

        assert_matches!(result, Err(Error::NotImplemented(_)));
        assert!(fx.hub.calls().is_empty());
    }
}
