//! Deployment Orchestrator
//!
//! Sequences one run across the cluster registry:
//!
//! ```text
//! OCP ─▶ network split ─▶ ACM hub ─▶ LVMO ─▶ Submariner ─▶ storage ─▶ verify ─▶ Regional DR
//! ```
//!
//! Every phase is timed into [`DeployMetrics`]; the textfile is written to
//! the run directory whether the run succeeded or not. A failed deploy is
//! never rolled back.

use super::acm;
use super::lvmo;
use super::storage::{operator_source, storage_package};
use super::submariner::SubmarinerDeployer;
use super::{DeployDeps, ExternalSettings, StorageDeployer, StorageOutcome};
use crate::artifacts::ManifestStore;
use crate::cluster::{ClusterContext, ClusterHandle, ClusterOps, ClusterRegistry};
use crate::config::RunConfig;
use crate::domain::ports::{ClockRef, CommandRunnerRef, RemoteShellRef, TagResolverRef};
use crate::dr::deployer::{DR_HUB_PACKAGE, MCO_PACKAGE};
use crate::dr::{DrScope, MetadataStore, MultiClusterDrDeployer};
use crate::error::Result;
use crate::metrics::DeployMetrics;
use crate::plan::{DeploymentPlan, Version};
use crate::platform::PlatformDeployerRef;
use crate::poll::Poller;
use std::future::Future;
use tracing::{error, info, warn};

// =============================================================================
// Adapters
// =============================================================================

/// Outside-world collaborators injected into a run
#[derive(Clone)]
pub struct Adapters {
    pub platform: PlatformDeployerRef,
    pub tags: TagResolverRef,
    pub runner: CommandRunnerRef,
    pub shell: RemoteShellRef,
    pub clock: ClockRef,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    plan: DeploymentPlan,
    registry: ClusterRegistry,
    adapters: Adapters,
    external: ExternalSettings,
    poller: Poller,
    artifacts: ManifestStore,
    metrics: DeployMetrics,
}

impl Orchestrator {
    pub fn new(config: &RunConfig, registry: ClusterRegistry, adapters: Adapters) -> Result<Self> {
        let plan = DeploymentPlan::from_config(config)?;
        let artifacts = ManifestStore::new(config.run.run_dir.as_deref())?;
        info!(
            "Run of OCS {} on OCP {} ({}) across {} cluster(s), artifacts in {}",
            plan.ocs_version,
            plan.ocp_version,
            plan.platform,
            registry.len(),
            artifacts.dir().display()
        );
        Ok(Self {
            poller: Poller::new(adapters.clock.clone()),
            external: ExternalSettings::from_config(config),
            metrics: DeployMetrics::new()?,
            plan,
            registry,
            adapters,
            artifacts,
        })
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn metrics(&self) -> &DeployMetrics {
        &self.metrics
    }

    pub fn artifacts(&self) -> &ManifestStore {
        &self.artifacts
    }

    fn deps(&self) -> DeployDeps<'_> {
        DeployDeps {
            plan: &self.plan,
            platform: self.adapters.platform.as_ref(),
            tags: self.adapters.tags.as_ref(),
            shell: self.adapters.shell.as_ref(),
            external: &self.external,
        }
    }

    fn ops<'a>(&'a self, handle: &'a ClusterHandle) -> ClusterOps<'a> {
        ClusterOps::new(handle, &self.poller, &self.artifacts)
    }

    // =========================================================================
    // Deploy
    // =========================================================================

    pub async fn deploy_cluster(&self, log_level: &str) -> Result<()> {
        let result = self.run_phases(log_level).await;
        if let Err(e) = self.metrics.write_textfile(self.artifacts.dir()) {
            warn!("Deployment metrics not written: {}", e);
        }
        result
    }

    async fn run_phases(&self, log_level: &str) -> Result<()> {
        self.timed("ocp", self.deploy_ocp(log_level)).await?;
        self.timed("network_split", self.setup_network_split()).await?;
        self.timed("acm_hub", self.deploy_acm_hub()).await?;
        self.timed("lvmo", self.deploy_lvmo()).await?;
        self.timed("submariner", self.deploy_submariner()).await?;

        if self.plan.skip_ocs {
            warn!("OCS deployment will be skipped");
            if self.plan.dr.is_some() {
                warn!("Regional DR needs OCS on the managed clusters, skipping it too");
            }
            return Ok(());
        }
        self.timed("storage", self.deploy_storage()).await?;
        if self.registry.is_multicluster() {
            self.timed("verify", self.verify_storage()).await?;
        }
        self.timed("dr", self.deploy_dr()).await?;
        info!("Deployment finished");
        Ok(())
    }

    async fn timed<T>(&self, phase: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let clock = &self.adapters.clock;
        let started = clock.now();
        let result = work.await;
        let elapsed = clock.now().saturating_duration_since(started);
        self.metrics.observe_phase(phase, elapsed, result.is_ok());
        if let Err(e) = &result {
            error!("Phase {} failed after {:?}: {}", phase, elapsed, e);
        }
        result
    }

    async fn deploy_ocp(&self, log_level: &str) -> Result<()> {
        if self.plan.skip_ocp {
            warn!("OCP deployment will be skipped");
            return Ok(());
        }
        let (platform, poller, artifacts) = (self.adapters.platform.as_ref(), &self.poller, &self.artifacts);
        self.registry
            .for_each(self.registry.all(), move |handle| async move {
                if handle.client().is_reachable().await {
                    warn!("OCP on {} is already reachable, not installing it again", handle.name());
                    return Ok(());
                }
                platform.deploy_ocp(handle.context(), log_level).await?;
                platform
                    .post_ocp_deploy(&ClusterOps::new(&handle, poller, artifacts))
                    .await
            })
            .await?;
        Ok(())
    }

    async fn setup_network_split(&self) -> Result<()> {
        let Some(split) = &self.plan.network_split else {
            return Ok(());
        };
        let arbiter_zone = self.plan.arbiter.as_ref().and_then(|a| a.zone.as_deref());
        let (platform, poller, artifacts) = (self.adapters.platform.as_ref(), &self.poller, &self.artifacts);
        self.registry
            .for_each(self.registry.non_hub(), move |handle| async move {
                let ops = ClusterOps::new(&handle, poller, artifacts);
                platform.setup_network_split(&ops, split, arbiter_zone).await
            })
            .await?;
        Ok(())
    }

    async fn deploy_acm_hub(&self) -> Result<()> {
        let Some(acm_plan) = &self.plan.acm_hub else {
            return Ok(());
        };
        if self.plan.ocp_version < Version::V4_9 {
            warn!("ACM hub needs OCP 4.9 or newer, found {}; skipping it", self.plan.ocp_version);
            return Ok(());
        }
        let handle = self.registry.hub().unwrap_or_else(|_| self.registry.current());
        let _scope = self.registry.enter(handle.index())?;
        let ops = self.ops(&handle);
        acm::deploy_acm_hub(&ops, acm_plan).await?;
        self.metrics.record_install(acm::ACM_OPERATOR, ops.cluster);
        Ok(())
    }

    async fn deploy_lvmo(&self) -> Result<()> {
        if !self.plan.install_lvmo {
            return Ok(());
        }
        if self.plan.ocs_version < Version::V4_10 {
            warn!("LVMO needs OCS 4.10 or newer, LVMO deployment will be skipped");
            return Ok(());
        }
        let handle = self.registry.current();
        let ops = self.ops(&handle);
        lvmo::deploy_lvmo(&ops, &self.deps()).await?;
        self.metrics.record_install(lvmo::LVMO_PACKAGE, ops.cluster);
        Ok(())
    }

    async fn deploy_submariner(&self) -> Result<()> {
        if !self.registry.is_multicluster() {
            return Ok(());
        }
        if self.plan.skip_submariner {
            warn!("Submariner deployment will be skipped");
            return Ok(());
        }
        let broker = match self.registry.hub() {
            Ok(hub) => hub,
            Err(_) => self.registry.get(0)?,
        };
        let members: Vec<ClusterContext> = self
            .registry
            .non_hub()
            .iter()
            .map(|h| h.context().clone())
            .collect();
        SubmarinerDeployer::new(self.adapters.runner.as_ref(), self.artifacts.dir())
            .deploy(broker.context(), &members)
            .await
    }

    async fn deploy_storage(&self) -> Result<()> {
        let (poller, artifacts, metrics, deps) = (&self.poller, &self.artifacts, &self.metrics, self.deps());
        let package = storage_package(&self.plan);
        self.registry
            .for_each(self.registry.non_hub(), move |handle| async move {
                let ops = ClusterOps::new(&handle, poller, artifacts);
                match StorageDeployer::new(ops, deps).deploy().await {
                    Ok(StorageOutcome::AlreadyDeployed) => Ok(()),
                    Ok(_) => {
                        metrics.record_install(package, ops.cluster);
                        Ok(())
                    }
                    Err(e) => {
                        error!("OCS deployment on {} failed: {}", handle.name(), e);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(())
    }

    async fn verify_storage(&self) -> Result<()> {
        let (poller, artifacts, deps) = (&self.poller, &self.artifacts, self.deps());
        self.registry
            .for_each(self.registry.non_hub(), move |handle| async move {
                StorageDeployer::new(ClusterOps::new(&handle, poller, artifacts), deps)
                    .verify_installation()
                    .await
            })
            .await?;
        Ok(())
    }

    async fn deploy_dr(&self) -> Result<()> {
        let Some(dr_plan) = &self.plan.dr else {
            return Ok(());
        };
        MetadataStore::new(dr_plan.metadata_store.parse()?)?;

        let hub = self.registry.hub()?;
        let ops = self.ops(&hub);
        let source = {
            let _scope = self.registry.enter(hub.index())?;
            operator_source(&ops, &self.deps()).await?
        };
        let scope = DrScope {
            registry: &self.registry,
            poller: &self.poller,
            artifacts: &self.artifacts,
        };
        let report = MultiClusterDrDeployer::new(scope, &self.plan, dr_plan, source)?
            .deploy()
            .await?;
        self.metrics.record_install(MCO_PACKAGE, ops.cluster);
        self.metrics.record_install(DR_HUB_PACKAGE, ops.cluster);
        info!(
            "Regional DR ready for {} (Ramen config in {})",
            report.configuration.clusters.join(", "),
            report.ramen_config.display()
        );
        Ok(())
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    /// Uninstall storage, then tear every cluster down; uninstall failures
    /// never stop the teardown
    pub async fn destroy_cluster(&self, log_level: &str) -> Result<()> {
        if !self.plan.skip_ocs {
            let (poller, artifacts, deps) = (&self.poller, &self.artifacts, self.deps());
            self.registry
                .for_each(self.registry.non_hub(), move |handle| async move {
                    let ops = ClusterOps::new(&handle, poller, artifacts);
                    if let Err(e) = StorageDeployer::new(ops, deps).uninstall().await {
                        error!("Failed to uninstall OCS from {}: {}; resuming teardown", handle.name(), e);
                    }
                    Ok(())
                })
                .await?;
        }

        let platform = self.adapters.platform.as_ref();
        self.registry
            .for_each(self.registry.all(), move |handle| async move {
                platform.destroy_ocp(handle.context(), log_level).await
            })
            .await?;
        info!("Teardown finished");
        Ok(())
    }
}
