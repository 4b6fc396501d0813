//! Platform Capabilities
//!
//! Everything that differs between infrastructure providers sits behind
//! [`PlatformDeployer`]:
//! - OCP bring-up and teardown
//! - default and custom storage classes for device sets
//! - node level remediation (NTP resync, registry mirrors, network split)
//!
//! The orchestrator holds one deployer for the run and never branches on the
//! platform itself. Capabilities shared by every platform are default trait
//! methods built from the helpers in this module.

pub mod aws;
pub mod baremetal;
pub mod ibm_cloud;
pub mod local_storage;
pub mod machine_config;
pub mod network_split;
pub mod vsphere;

pub use aws::AwsDeployer;
pub use baremetal::BaremetalDeployer;
pub use ibm_cloud::IbmCloudDeployer;
pub use vsphere::VsphereDeployer;

use crate::cluster::{ClusterContext, ClusterOps};
use crate::config::RunConfig;
use crate::crd::{to_manifest, ImageContentSourcePolicy, ImageContentSourcePolicySpec, RepositoryDigestMirror};
use crate::document::{name_of, str_at};
use crate::domain::ports::{CommandRunner, CommandRunnerRef, LocalCommand, ResourceKind};
use crate::error::{Error, Result};
use crate::plan::{NetworkSplitPlan, Platform, Version};
use crate::poll::{PollTarget, Probe};
use async_trait::async_trait;
use machine_config::{apply_and_roll_out, MachineConfigBuilder, NodeFile, POOL_UPDATE_TIMEOUT};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const WORKER_SELECTOR: &str = "node-role.kubernetes.io/worker";
pub const MASTER_SELECTOR: &str = "node-role.kubernetes.io/master";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const NODES_READY_TIMEOUT: Duration = Duration::from_secs(1200);
const DUMMY_ZONES: [&str; 3] = ["a", "b", "c"];
const MIRROR_ICSP_NAME: &str = "disconnected-mirror";
const MIRRORED_REGISTRIES: [&str; 2] = ["registry.redhat.io", "quay.io"];

// =============================================================================
// Settings
// =============================================================================

/// Platform-relevant part of the run configuration
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub ocp_version: Version,
    pub deployment_type: String,
    pub installer_binary: String,
    pub huge_pages: bool,
    pub dummy_zone_labels: bool,
    pub ntp_server: String,
    pub mirror_registry: Option<String>,
    pub thick_sc: bool,
}

impl PlatformSettings {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            ocp_version: config.env_data.ocp_version.parse()?,
            deployment_type: config.env_data.deployment_type.to_lowercase(),
            installer_binary: config.deployment.installer_binary.clone(),
            huge_pages: config.env_data.huge_pages,
            dummy_zone_labels: config.deployment.dummy_zone_node_labels,
            ntp_server: config.env_data.ntp_server.clone(),
            mirror_registry: config.deployment.mirror_registry.clone(),
            thick_sc: config.deployment.thick_sc,
        })
    }

    /// Installer-provisioned infrastructure is the only automated flavour
    fn require_ipi(&self, platform: Platform) -> Result<()> {
        if self.deployment_type == "ipi" {
            Ok(())
        } else {
            Err(Error::UnsupportedFeature(format!(
                "{} deployment type on {}",
                self.deployment_type, platform
            )))
        }
    }
}

// =============================================================================
// Capability Interface
// =============================================================================

/// Platform-specific deployment steps composed into the orchestrator
#[async_trait]
pub trait PlatformDeployer: Send + Sync {
    fn platform(&self) -> Platform;

    fn settings(&self) -> &PlatformSettings;

    /// Storage class the platform marks as cluster default, if any
    fn default_storage_class(&self) -> Option<String>;

    /// Extra storage class created before the StorageCluster, if any
    fn custom_storage_class(&self) -> Option<Value> {
        None
    }

    /// Storage class backing non-LSO device sets
    fn device_storage_class(&self) -> Option<String> {
        self.custom_storage_class()
            .map(|sc| name_of(&sc).to_string())
            .or_else(|| self.default_storage_class())
    }

    /// Install OCP for `cluster`
    async fn deploy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()>;

    /// Tear OCP down for `cluster`
    async fn destroy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()>;

    /// Node readiness and optional node tweaks after a fresh install
    async fn post_ocp_deploy(&self, ops: &ClusterOps<'_>) -> Result<()> {
        post_ocp_deploy(self.settings(), ops).await
    }

    /// Install LSO and wait for its storage class
    async fn setup_local_storage(&self, ops: &ClusterOps<'_>, source: &str) -> Result<()> {
        local_storage::setup(ops, source).await
    }

    /// Size of the smallest PV served by `storage_class`
    async fn smallest_pv_size(&self, ops: &ClusterOps<'_>, storage_class: &str) -> Result<Option<String>> {
        smallest_pv_size(ops, storage_class).await
    }

    /// Push an NTP source to the workers after Ceph reported clock skew
    async fn ntp_resync(&self, ops: &ClusterOps<'_>) -> Result<()> {
        ntp_resync(&self.settings().ntp_server, ops).await
    }

    async fn setup_network_split(
        &self,
        ops: &ClusterOps<'_>,
        plan: &NetworkSplitPlan,
        arbiter_zone: Option<&str>,
    ) -> Result<()> {
        network_split::setup(ops, plan, arbiter_zone).await
    }

    /// Point image pulls at the mirror registry of a disconnected run
    async fn prepare_disconnected(&self, ops: &ClusterOps<'_>) -> Result<()> {
        prepare_disconnected(self.settings().mirror_registry.as_deref(), ops).await
    }
}

pub type PlatformDeployerRef = Arc<dyn PlatformDeployer>;

/// Factory for platform deployers
pub struct PlatformFactory;

impl PlatformFactory {
    pub fn create(
        platform: Platform,
        settings: PlatformSettings,
        runner: CommandRunnerRef,
    ) -> Result<PlatformDeployerRef> {
        match platform {
            Platform::Aws => Ok(Arc::new(AwsDeployer::new(settings, runner))),
            Platform::Vsphere => Ok(Arc::new(VsphereDeployer::new(settings, runner))),
            Platform::Baremetal => Ok(Arc::new(BaremetalDeployer::new(settings))),
            Platform::IbmCloud => Ok(Arc::new(IbmCloudDeployer::new(settings))),
        }
    }
}

// =============================================================================
// openshift-install
// =============================================================================

/// `openshift-install` driven against a cluster directory
pub struct OpenshiftInstall<'a> {
    runner: &'a dyn CommandRunner,
    binary: &'a str,
}

impl<'a> OpenshiftInstall<'a> {
    pub fn new(runner: &'a dyn CommandRunner, binary: &'a str) -> Self {
        Self { runner, binary }
    }

    /// Installer directory; the kubeconfig lives at `<dir>/auth/kubeconfig`
    pub fn cluster_dir(cluster: &ClusterContext) -> PathBuf {
        cluster
            .kubeconfig
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn command(&self, action: &str, cluster: &ClusterContext, log_level: &str) -> LocalCommand {
        LocalCommand::new(self.binary)
            .arg(action)
            .arg("cluster")
            .arg("--dir")
            .arg(Self::cluster_dir(cluster).display().to_string())
            .arg("--log-level")
            .arg(log_level.to_lowercase())
    }

    pub async fn create(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        info!("Deploying OCP cluster {}", cluster.name);
        self.runner.run(&self.command("create", cluster, log_level)).await?;
        Ok(())
    }

    pub async fn destroy(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        info!("Destroying OCP cluster {}", cluster.name);
        self.runner.run(&self.command("destroy", cluster, log_level)).await?;
        Ok(())
    }
}

// =============================================================================
// Shared Capabilities
// =============================================================================

fn node_ready(node: &Value) -> bool {
    node.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map_or(false, |conditions| {
            conditions
                .iter()
                .any(|c| c["type"] == "Ready" && c["status"] == "True")
        })
}

/// Wait until every node reports `Ready=True`
pub async fn wait_for_nodes_ready(ops: &ClusterOps<'_>, timeout: Duration) -> Result<usize> {
    let client = ops.client;
    let target = PollTarget::new("Node", "all", "Ready");
    let count = ops
        .poller
        .until(&target, Duration::from_secs(30), timeout, || async move {
            let nodes = client.list(ResourceKind::Node, None, None).await?;
            let not_ready: Vec<&str> = nodes.iter().filter(|n| !node_ready(n)).map(name_of).collect();
            Ok(if !nodes.is_empty() && not_ready.is_empty() {
                Probe::Ready(nodes.len())
            } else {
                Probe::Pending(format!("not ready: {:?}", not_ready))
            })
        })
        .await?;
    info!("All {} nodes of {} are Ready", count, ops.cluster);
    Ok(count)
}

pub async fn post_ocp_deploy(settings: &PlatformSettings, ops: &ClusterOps<'_>) -> Result<()> {
    match ops.client.get(ResourceKind::ClusterVersion, None, "version").await {
        Ok(version) => info!(
            "clusterID (UUID): {}",
            str_at(&version, "/spec/clusterID").unwrap_or("<unknown>")
        ),
        Err(e) => warn!("Cannot read the cluster ID of {}: {}", ops.cluster, e),
    }
    wait_for_nodes_ready(ops, NODES_READY_TIMEOUT).await?;

    if settings.huge_pages {
        enable_huge_pages(ops).await?;
    }
    if settings.dummy_zone_labels {
        label_dummy_zones(ops).await?;
    }
    Ok(())
}

pub async fn enable_huge_pages(ops: &ClusterOps<'_>) -> Result<()> {
    info!("Enabling huge pages on workers of {}", ops.cluster);
    let config = MachineConfigBuilder::new("50-worker-hugepages", "worker")
        .kernel_argument("default_hugepagesz=2M")
        .kernel_argument("hugepagesz=2M")
        .kernel_argument("hugepages=512")
        .build();
    apply_and_roll_out(ops, "huge_pages_manifest", &[config]).await
}

/// Spread workers round robin over three fake zones
pub async fn label_dummy_zones(ops: &ClusterOps<'_>) -> Result<()> {
    let mut workers = ops.client.list(ResourceKind::Node, None, Some(WORKER_SELECTOR)).await?;
    if workers.is_empty() {
        return Err(Error::UnavailableResource("No worker node found!".into()));
    }
    workers.sort_by(|a, b| name_of(a).cmp(name_of(b)));
    for (node, zone) in workers.iter().zip(DUMMY_ZONES.iter().cycle()) {
        info!("Labeling node {} with zone {}", name_of(node), zone);
        ops.client
            .patch(
                ResourceKind::Node,
                None,
                name_of(node),
                &json!({"metadata": {"labels": {ZONE_LABEL: zone}}}),
            )
            .await?;
    }
    Ok(())
}

/// Parse a Kubernetes quantity such as `300Gi` or `1T` into bytes
pub fn parse_quantity(quantity: &str) -> Option<u128> {
    const UNITS: [(&str, u128); 10] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    let quantity = quantity.trim();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, factor)| quantity.strip_suffix(suffix).map(|n| (n, *factor)))
        .unwrap_or((quantity, 1));
    number.parse::<u128>().ok().map(|n| n * multiplier)
}

pub async fn smallest_pv_size(ops: &ClusterOps<'_>, storage_class: &str) -> Result<Option<String>> {
    let volumes = ops.client.list(ResourceKind::PersistentVolume, None, None).await?;
    Ok(volumes
        .iter()
        .filter(|pv| str_at(pv, "/spec/storageClassName") == Some(storage_class))
        .filter_map(|pv| str_at(pv, "/spec/capacity/storage"))
        .filter_map(|size| parse_quantity(size).map(|bytes| (bytes, size)))
        .min_by_key(|(bytes, _)| *bytes)
        .map(|(_, size)| size.to_string()))
}

pub async fn ntp_resync(server: &str, ops: &ClusterOps<'_>) -> Result<()> {
    info!("Resyncing worker clocks of {} against {}", ops.cluster, server);
    let chrony = format!(
        "server {} iburst\ndriftfile /var/lib/chrony/drift\nmakestep 1.0 3\nrtcsync\nlogdir /var/log/chrony\n",
        server
    );
    let config = MachineConfigBuilder::new("99-worker-chrony", "worker")
        .file(NodeFile::new("/etc/chrony.conf", 0o644, chrony))
        .build();
    apply_and_roll_out(ops, "chrony_manifest", &[config]).await
}

pub async fn prepare_disconnected(mirror: Option<&str>, ops: &ClusterOps<'_>) -> Result<()> {
    let mirror = mirror
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Configuration("disconnected deployment needs mirror_registry".into()))?;
    info!("Mirroring {:?} through {}", MIRRORED_REGISTRIES, mirror);
    let icsp = to_manifest(
        ImageContentSourcePolicy::new(
            MIRROR_ICSP_NAME,
            ImageContentSourcePolicySpec {
                repository_digest_mirrors: MIRRORED_REGISTRIES
                    .iter()
                    .map(|source| RepositoryDigestMirror {
                        source: source.to_string(),
                        mirrors: vec![format!("{}/{}", mirror.trim_end_matches('/'), source)],
                    })
                    .collect(),
            },
        ),
        None,
    )?;
    ops.artifacts.record("mirror_icsp_manifest", &icsp)?;
    ops.client.apply(&icsp).await?;
    machine_config::wait_for_pools_updated(ops, POOL_UPDATE_TIMEOUT).await
}


#[cfg(test)]
mod tests {
    use super::fixtures::{node, pv};
    use super::machine_config::pool;
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::poll::Poller;
    use crate::testing::{Call, FakeClock, FakeControlPlane, FakeRunner};
    use assert_matches::assert_matches;

    struct Harness {
        client: FakeControlPlane,
        poller: Poller,
        artifacts: ManifestStore,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                client: FakeControlPlane::new(),
                poller: Poller::new(Arc::new(FakeClock::new())),
                artifacts: ManifestStore::temporary().unwrap(),
            }
        }

        fn ops(&self) -> ClusterOps<'_> {
            ClusterOps {
                cluster: "c1",
                client: &self.client,
                poller: &self.poller,
                artifacts: &self.artifacts,
            }
        }
    }

    fn settings(yaml: &str) -> PlatformSettings {
        PlatformSettings::from_config(&RunConfig::from_yaml(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("300Gi"), Some(300 << 30));
        assert_eq!(parse_quantity("1T"), Some(1_000_000_000_000));
        assert_eq!(parse_quantity("1024"), Some(1024));
        assert_eq!(parse_quantity("lots"), None);
    }

    #[tokio::test]
    async fn test_smallest_pv_size_filters_by_class() {
        let h = Harness::new();
        h.client.insert(pv("local-pv-1", "localblock", "2Ti"));
        h.client.insert(pv("local-pv-2", "localblock", "300Gi"));
        h.client.insert(pv("gp2-pv", "gp2", "10Gi"));

        assert_eq!(
            smallest_pv_size(&h.ops(), "localblock").await.unwrap(),
            Some("300Gi".to_string())
        );
        assert_eq!(smallest_pv_size(&h.ops(), "thin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dummy_zone_labels_round_robin() {
        let h = Harness::new();
        for i in 0..4 {
            h.client.insert(node(&format!("worker-{}", i), "worker", None, "10.0.0.1", true));
        }
        h.client.insert(node("master-0", "master", None, "10.0.1.1", true));

        label_dummy_zones(&h.ops()).await.unwrap();

        let zone = |name: &str| {
            h.client.object(ResourceKind::Node, None, name).unwrap()["metadata"]["labels"][ZONE_LABEL].clone()
        };
        assert_eq!(zone("worker-0"), "a");
        assert_eq!(zone("worker-1"), "b");
        assert_eq!(zone("worker-2"), "c");
        assert_eq!(zone("worker-3"), "a");
        assert!(zone("master-0").is_null());
    }

    #[tokio::test]
    async fn test_post_deploy_waits_for_nodes_then_applies_huge_pages() {
        let h = Harness::new();
        h.client.insert(node("worker-0", "worker", None, "10.0.0.1", true));
        h.client.insert(pool("worker", true));
        let settings = settings("env_data:\n  huge_pages: true\n");

        post_ocp_deploy(&settings, &h.ops()).await.unwrap();

        let config = h
            .client
            .object(ResourceKind::MachineConfig, None, "50-worker-hugepages")
            .unwrap();
        assert_eq!(config["spec"]["kernelArguments"][1], "hugepagesz=2M");
    }

    #[tokio::test]
    async fn test_post_deploy_times_out_on_unready_node() {
        let h = Harness::new();
        h.client.insert(node("worker-0", "worker", None, "10.0.0.1", false));
        let err = post_ocp_deploy(&settings("env_data: {}\n"), &h.ops()).await.unwrap_err();
        assert_matches!(err, Error::ResourceWrongStatus { ref kind, .. } if kind == "Node");
    }

    #[tokio::test]
    async fn test_ntp_resync_renders_chrony_and_waits() {
        let h = Harness::new();
        h.client.insert(pool("worker", true));

        ntp_resync("clock.example.com", &h.ops()).await.unwrap();

        let config = h.client.object(ResourceKind::MachineConfig, None, "99-worker-chrony").unwrap();
        assert_eq!(config["metadata"]["labels"][machine_config::ROLE_LABEL], "worker");
        let calls = h.client.calls();
        let applied = calls
            .iter()
            .position(|c| matches!(c, Call::Apply { kind: ResourceKind::MachineConfig, .. }))
            .unwrap();
        let waited = calls
            .iter()
            .position(|c| matches!(c, Call::List { kind: ResourceKind::MachineConfigPool, .. }))
            .unwrap();
        assert!(applied < waited);
    }

    #[tokio::test]
    async fn test_disconnected_requires_mirror() {
        let h = Harness::new();
        let err = prepare_disconnected(None, &h.ops()).await.unwrap_err();
        assert_matches!(err, Error::Configuration(_));

        h.client.insert(pool("master", true));
        prepare_disconnected(Some("mirror.example.com:5000/"), &h.ops()).await.unwrap();
        let icsp = h
            .client
            .object(ResourceKind::ImageContentSourcePolicy, None, MIRROR_ICSP_NAME)
            .unwrap();
        assert_eq!(
            icsp["spec"]["repositoryDigestMirrors"][0]["mirrors"][0],
            "mirror.example.com:5000/registry.redhat.io"
        );
    }

    #[tokio::test]
    async fn test_openshift_install_command_line() {
        let runner = FakeRunner::new();
        let cluster = ClusterContext {
            index: 0,
            name: "c1".into(),
            kubeconfig: PathBuf::from("/clusters/c1/auth/kubeconfig"),
            role: crate::cluster::ClusterRole::Primary,
        };
        OpenshiftInstall::new(&runner, "openshift-install")
            .create(&cluster, "DEBUG")
            .await
            .unwrap();
        assert_eq!(
            runner.commands.lock().as_slice(),
            ["openshift-install create cluster --dir /clusters/c1 --log-level debug"]
        );
    }

    #[test]
    fn test_factory_builds_each_platform() {
        let runner: CommandRunnerRef = Arc::new(FakeRunner::new());
        for platform in [Platform::Aws, Platform::Vsphere, Platform::Baremetal, Platform::IbmCloud] {
            let deployer = PlatformFactory::create(platform, settings("env_data: {}\n"), runner.clone()).unwrap();
            assert_eq!(deployer.platform(), platform);
        }
    }
}
