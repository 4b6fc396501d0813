//! Storage product deployment on one managed cluster
//!
//! # Flow
//!
//! ```text
//! registry Managed → existing CephCluster? → disconnected prep
//!   ├─ external → ExternalModeDeployer
//!   └─ internal → nodes → catalog → LSO → namespace → operators
//!                → StorageSystem → StorageCluster → pods → services → health
//! ```
//!
//! An existing CephCluster in the storage namespace short-circuits the run,
//! so a re-run against a deployed cluster creates nothing.

use super::ceph;
use super::external::ExternalModeDeployer;
use super::nodes;
use super::pods::{wait_for_pods, PodCount};
use super::services;
use super::DeployDeps;
use crate::cluster::ClusterOps;
use crate::composer::{compose, PlatformDefaults, LSO_STORAGE_CLASS};
use crate::config::Component;
use crate::document::{phase_of, str_at};
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::olm::installer::{dependent_operators, InstallReport, OperatorRequest, OCS_OPERATOR, ODF_OPERATOR};
use crate::olm::{CatalogSourceManager, OPERATOR_CATALOG_SOURCE};
use crate::plan::{DeploymentPlan, Platform, Version};
use crate::poll::{PollTarget, Probe};
use crate::templates;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

pub const OPERATOR_GROUP: &str = "openshift-storage-operatorgroup";
pub const MON_SELECTOR: &str = "app=rook-ceph-mon";
pub const MGR_SELECTOR: &str = "app=rook-ceph-mgr";
pub const OSD_SELECTOR: &str = "app=rook-ceph-osd";
pub const CONSOLE_SELECTOR: &str = "app=odf-console";
pub const NOOBAA_SELECTOR: &str = "app=noobaa";

const MON_TIMEOUT: Duration = Duration::from_secs(900);
const POD_TIMEOUT: Duration = Duration::from_secs(600);
const STORAGE_CLUSTER_READY_TIMEOUT: Duration = Duration::from_secs(600);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TRIES: u32 = 30;
const HEALTH_TRIES_AFTER_NTP: u32 = 60;
const HEALTH_DELAY: Duration = Duration::from_secs(10);

/// What a storage deployment ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOutcome {
    AlreadyDeployed,
    Internal,
    McgOnly,
    External,
}

// =============================================================================
// Shared Operator Steps
// =============================================================================

/// Catalog source the storage subscription reads from
pub fn subscription_source(plan: &DeploymentPlan) -> String {
    if plan.subscription.live {
        plan.subscription.live_content_source.clone()
    } else {
        OPERATOR_CATALOG_SOURCE.to_string()
    }
}

/// Entry point package of the storage product
pub fn storage_package(plan: &DeploymentPlan) -> &'static str {
    if plan.uses_odf_operator() {
        ODF_OPERATOR
    } else {
        OCS_OPERATOR
    }
}

/// Create the custom catalog unless the run installs released content
pub(crate) async fn operator_source(ops: &ClusterOps<'_>, deps: &DeployDeps<'_>) -> Result<String> {
    let plan = deps.plan;
    if !plan.subscription.live {
        let image = CatalogSourceManager::new(*ops, deps.tags)
            .create(&plan.catalog, plan.ocp_version, None)
            .await?;
        info!("Catalog source {} serves {}", OPERATOR_CATALOG_SOURCE, image);
    }
    Ok(subscription_source(plan))
}

/// Storage namespace with cluster monitoring and its operator group
pub(crate) async fn ensure_storage_namespace(ops: &ClusterOps<'_>, plan: &DeploymentPlan) -> Result<()> {
    let installer = ops.installer();
    installer
        .ensure_namespace(&plan.namespace, json!({"openshift.io/cluster-monitoring": "true"}))
        .await?;
    installer
        .ensure_operator_group(&plan.namespace, OPERATOR_GROUP, vec![plan.namespace.clone()])
        .await
}

/// Subscribe to the storage product, then wait for `operators` to succeed
pub(crate) async fn subscribe(
    ops: &ClusterOps<'_>,
    plan: &DeploymentPlan,
    source: &str,
    operators: &[&str],
) -> Result<InstallReport> {
    let installer = ops.installer();
    let request = OperatorRequest::new(storage_package(plan), &plan.namespace, source)
        .channel(plan.subscription.channel.clone())
        .approval(plan.subscription.approval);
    let report = installer.install(&request).await?;
    info!("{} installed from channel {} as {}", report.package, report.channel, report.csv);
    installer
        .wait_for_operators(&plan.namespace, operators, source, Some(report.channel.as_str()))
        .await?;
    Ok(report)
}

fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

// =============================================================================
// Deployer
// =============================================================================

pub struct StorageDeployer<'a> {
    ops: ClusterOps<'a>,
    deps: DeployDeps<'a>,
}

impl<'a> StorageDeployer<'a> {
    pub fn new(ops: ClusterOps<'a>, deps: DeployDeps<'a>) -> Self {
        Self { ops, deps }
    }

    pub async fn deploy(&self) -> Result<StorageOutcome> {
        let plan = self.deps.plan;
        let ops = &self.ops;
        services::set_registry_managed(ops).await?;

        if self.already_deployed().await? {
            warn!("OCS cluster already exists on {}", ops.cluster);
            return Ok(StorageOutcome::AlreadyDeployed);
        }

        if plan.disconnected {
            self.deps.platform.prepare_disconnected(ops).await?;
        }

        if plan.external_mode {
            ExternalModeDeployer::new(self.ops, self.deps).deploy().await?;
            return Ok(StorageOutcome::External);
        }

        self.install_operators().await?;

        if plan.mcg_only {
            self.deploy_mcg_only().await?;
            return Ok(StorageOutcome::McgOnly);
        }

        self.create_storage_cluster().await?;
        self.wait_for_ceph_pods().await?;

        if !plan.component_disabled(Component::Cephfs) {
            ceph::validate_cephfs(ops, &plan.namespace).await;
        }
        let prefix = &plan.storage_cluster_name;
        services::setup_monitoring(ops, &plan.monitoring, &format!("{}-ceph-rbd", prefix)).await?;
        if !plan.component_disabled(Component::Cephfs) {
            services::registry_to_cephfs(ops, &format!("{}-cephfs", prefix)).await?;
        }
        if plan.ocs_version >= Version::V4_9 {
            services::enable_console_plugin(ops).await?;
        }

        self.check_health().await?;
        services::unset_default_storage_class(ops, self.deps.platform.default_storage_class().as_deref()).await?;
        info!("OCS deployment on {} finished", ops.cluster);
        Ok(StorageOutcome::Internal)
    }

    async fn already_deployed(&self) -> Result<bool> {
        let plan = self.deps.plan;
        match self
            .ops
            .client
            .list(ResourceKind::CephCluster, Some(&plan.namespace), None)
            .await
        {
            Ok(clusters) => Ok(!clusters.is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Nodes, catalog, LSO, namespace and the operator subscription
    async fn install_operators(&self) -> Result<()> {
        let plan = self.deps.plan;
        let ops = &self.ops;

        nodes::label_and_taint(ops, &plan.nodes, plan.arbiter.as_ref()).await?;
        let source = operator_source(ops, &self.deps).await?;
        if plan.local_storage {
            self.deps.platform.setup_local_storage(ops, &source).await?;
        }
        ensure_storage_namespace(ops, plan).await?;
        if let Some(multus) = &plan.multus {
            self.create_public_network(multus.public_interface.as_deref()).await?;
        }

        let operators = dependent_operators(plan.ocs_version, plan.ocp_version, plan.subscription.live);
        subscribe(ops, plan, &source, &operators).await?;

        if plan.uses_odf_operator() {
            self.create_storage_system().await?;
        }
        if let Some(class) = self.deps.platform.custom_storage_class() {
            ops.artifacts.record("custom_storage_class", &class)?;
            ops.client.create_if_absent(&class).await?;
        }
        if let Some(level) = &plan.rook_log_level {
            ceph::set_rook_log_level(ops, &plan.namespace, level).await?;
        }
        Ok(())
    }

    async fn create_public_network(&self, interface: Option<&str>) -> Result<()> {
        let mut network = templates::load(templates::MULTUS_PUBLIC_NETWORK)?;
        network["metadata"]["namespace"] = json!(self.deps.plan.namespace);
        if let Some(interface) = interface {
            let raw = str_at(&network, "/spec/config").unwrap_or("{}");
            let mut config: Value = serde_json::from_str(raw)?;
            config["master"] = json!(interface);
            network["spec"]["config"] = json!(config.to_string());
        }
        self.ops.artifacts.record("multus_public_network", &network)?;
        self.ops.client.create_if_absent(&network).await?;
        Ok(())
    }

    async fn create_storage_system(&self) -> Result<()> {
        let plan = self.deps.plan;
        let mut system = templates::load(templates::STORAGE_SYSTEM)?;
        system["metadata"]["namespace"] = json!(plan.namespace);
        system["spec"]["name"] = json!(plan.storage_cluster_name);
        system["spec"]["namespace"] = json!(plan.namespace);
        self.ops.artifacts.record("storage_system", &system)?;
        self.ops.client.create_if_absent(&system).await?;
        Ok(())
    }

    async fn deploy_mcg_only(&self) -> Result<()> {
        let plan = self.deps.plan;
        info!("Deploying a standalone Multicloud Object Gateway on {}", self.ops.cluster);
        let cluster = json!({
            "apiVersion": "ocs.openshift.io/v1",
            "kind": "StorageCluster",
            "metadata": {"name": plan.storage_cluster_name, "namespace": plan.namespace},
            "spec": {"multiCloudGateway": {"reconcileStrategy": "standalone"}}
        });
        self.ops.artifacts.record("storage_cluster_manifest", &cluster)?;
        self.ops.client.create_if_absent(&cluster).await?;
        wait_for_pods(&self.ops, &plan.namespace, NOOBAA_SELECTOR, PodCount::AtLeast(2), POD_TIMEOUT).await?;
        Ok(())
    }

    /// Compose the StorageCluster for this cluster and create it
    async fn create_storage_cluster(&self) -> Result<()> {
        let plan = self.deps.plan;
        let platform = self.deps.platform;
        let ops = &self.ops;

        let arbiter_location = match &plan.arbiter {
            Some(arbiter) => Some(nodes::arbiter_location(ops, arbiter).await?),
            None => None,
        };
        let smallest_pv_size = if plan.local_storage && plan.platform == Platform::Baremetal {
            platform.smallest_pv_size(ops, LSO_STORAGE_CLASS).await?
        } else {
            None
        };
        let worker_zone_count = if plan.local_storage && plan.zone_count.is_none() {
            nodes::worker_zone_count(ops).await?
        } else {
            None
        };
        let defaults = PlatformDefaults {
            storage_class: platform.device_storage_class(),
            lso_storage_class: LSO_STORAGE_CLASS.to_string(),
            smallest_pv_size,
            arbiter_location,
            worker_zone_count,
        };

        let cluster = compose(&templates::storage_cluster()?, plan, &defaults)?.into_value();
        ops.artifacts.record("storage_cluster_manifest", &cluster)?;
        ops.client.create_if_absent(&cluster).await?;
        info!("StorageCluster {} created on {}", plan.storage_cluster_name, ops.cluster);

        if plan.nodes.infra_nodes {
            services::clear_namespace_node_selector(ops, &plan.namespace).await?;
        }
        Ok(())
    }

    async fn wait_for_ceph_pods(&self) -> Result<()> {
        let plan = self.deps.plan;
        let ops = &self.ops;
        let ns = plan.namespace.as_str();
        wait_for_pods(ops, ns, MON_SELECTOR, PodCount::AtLeast(3), MON_TIMEOUT).await?;
        wait_for_pods(ops, ns, MGR_SELECTOR, PodCount::AtLeast(1), POD_TIMEOUT).await?;
        wait_for_pods(ops, ns, OSD_SELECTOR, PodCount::AtLeast(3), POD_TIMEOUT).await?;
        if plan.ocs_version >= Version::V4_9 {
            wait_for_pods(ops, ns, CONSOLE_SELECTOR, PodCount::AtLeast(1), POD_TIMEOUT).await?;
        }
        ceph::enable_toolbox(ops, ns).await
    }

    /// Ceph health with one NTP resync when the mons disagree on time
    async fn check_health(&self) -> Result<()> {
        let ns = &self.deps.plan.namespace;
        match ceph::health_check(&self.ops, ns, HEALTH_TRIES, HEALTH_DELAY).await {
            Err(e) if e.is_clock_skew() => {
                warn!("Clock skew detected on {}, resyncing NTP", self.ops.cluster);
                self.deps.platform.ntp_resync(&self.ops).await?;
                ceph::health_check(&self.ops, ns, HEALTH_TRIES_AFTER_NTP, HEALTH_DELAY).await
            }
            other => other,
        }
    }

    /// StorageCluster `Ready` and every storage CSV `Succeeded`
    pub async fn verify_installation(&self) -> Result<()> {
        let plan = self.deps.plan;
        let client = self.ops.client;
        let namespace = plan.namespace.as_str();
        let name = plan.storage_cluster_name.as_str();

        if !plan.external_mode && !plan.mcg_only {
            let target = PollTarget::new("StorageCluster", name, "Ready");
            self.ops
                .poller
                .until(&target, Duration::from_secs(10), STORAGE_CLUSTER_READY_TIMEOUT, || async move {
                    let cluster = client.get(ResourceKind::StorageCluster, Some(namespace), name).await?;
                    let phase = phase_of(&cluster);
                    Ok(Probe::check(phase == "Ready", phase))
                })
                .await?;
        }

        let operators = if plan.external_mode {
            super::external::external_operators(plan)
        } else {
            dependent_operators(plan.ocs_version, plan.ocp_version, plan.subscription.live)
        };
        self.ops
            .installer()
            .wait_for_operators(namespace, &operators, &subscription_source(plan), plan.subscription.channel.as_deref())
            .await?;
        info!("OCS installation verified on {}", self.ops.cluster);
        Ok(())
    }

    /// Remove the StorageCluster and the storage namespace
    pub async fn uninstall(&self) -> Result<()> {
        let plan = self.deps.plan;
        let client = self.ops.client;
        let namespace = plan.namespace.as_str();
        let name = plan.storage_cluster_name.as_str();
        info!("Uninstalling OCS from {}", self.ops.cluster);

        if plan.uses_odf_operator() {
            let system = format!("{}-storagesystem", name);
            ignore_missing(client.delete(ResourceKind::StorageSystem, Some(namespace), &system).await)?;
        }
        ignore_missing(client.delete(ResourceKind::StorageCluster, Some(namespace), name).await)?;

        let target = PollTarget::new("StorageCluster", name, "deleted");
        self.ops
            .poller
            .until(&target, Duration::from_secs(10), TEARDOWN_TIMEOUT, || async move {
                match client.get(ResourceKind::StorageCluster, Some(namespace), name).await {
                    Ok(_) => Ok(Probe::Pending("present".into())),
                    Err(e) if e.is_not_found() => Ok(Probe::Ready(())),
                    Err(e) => Err(e),
                }
            })
            .await?;

        if let Err(e) = ignore_missing(client.delete(ResourceKind::Namespace, None, namespace).await) {
            error!("Failed to delete namespace {}: {}", namespace, e);
            return Err(Error::Internal(format!("namespace {} not removed: {}", namespace, e)));
        }
        Ok(())
    }
}
