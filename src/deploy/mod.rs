//! Deployment phases
//!
//! Each submodule drives one phase of a run against a single cluster
//! through [`ClusterOps`](crate::cluster::ClusterOps). The
//! [`orchestrator`] sequences them across the cluster registry.

pub mod acm;
pub mod ceph;
pub mod external;
pub mod lvmo;
pub mod nodes;
pub mod orchestrator;
pub mod pods;
pub mod services;
pub mod storage;
pub mod submariner;

pub use external::{ExternalModeDeployer, ExternalSettings};
pub use orchestrator::{Adapters, Orchestrator};
pub use storage::{StorageDeployer, StorageOutcome};

use crate::domain::ports::{RemoteShell, TagResolver};
use crate::plan::DeploymentPlan;
use crate::platform::PlatformDeployer;

/// Run-wide collaborators shared by every per-cluster phase
#[derive(Clone, Copy)]
pub struct DeployDeps<'a> {
    pub plan: &'a DeploymentPlan,
    pub platform: &'a dyn PlatformDeployer,
    pub tags: &'a dyn TagResolver,
    pub shell: &'a dyn RemoteShell,
    pub external: &'a ExternalSettings,
}

#[cfg(test)]
pub(crate) mod harness {
    use super::*;
    use crate::artifacts::ManifestStore;
    use crate::cluster::ClusterOps;
    use crate::config::RunConfig;
    use crate::platform::{PlatformDeployerRef, PlatformFactory, PlatformSettings};
    use crate::poll::Poller;
    use crate::testing::{FakeClock, FakeControlPlane, FakeRunner, FakeShell, FixedTag};
    use std::sync::Arc;

    /// One fake cluster plus everything a phase needs to run against it
    pub struct Harness {
        pub client: FakeControlPlane,
        pub shell: FakeShell,
        pub runner: Arc<FakeRunner>,
        pub clock: Arc<FakeClock>,
        pub poller: Poller,
        pub artifacts: ManifestStore,
        pub plan: DeploymentPlan,
        pub platform: PlatformDeployerRef,
        pub external: ExternalSettings,
        pub tags: FixedTag,
    }

    impl Harness {
        pub fn new(yaml: &str) -> Self {
            let config = RunConfig::from_yaml(yaml).unwrap();
            let plan = DeploymentPlan::from_config(&config).unwrap();
            let runner = Arc::new(FakeRunner::new());
            let platform = PlatformFactory::create(
                plan.platform,
                PlatformSettings::from_config(&config).unwrap(),
                runner.clone(),
            )
            .unwrap();
            let clock = Arc::new(FakeClock::new());
            Self {
                client: FakeControlPlane::new(),
                shell: FakeShell::new(),
                runner,
                poller: Poller::new(clock.clone()),
                clock,
                artifacts: ManifestStore::temporary().unwrap(),
                plan,
                platform,
                external: ExternalSettings::from_config(&config),
                tags: FixedTag("4.12.0-100"),
            }
        }

        pub fn ops(&self) -> ClusterOps<'_> {
            ClusterOps {
                cluster: "c1",
                client: &self.client,
                poller: &self.poller,
                artifacts: &self.artifacts,
            }
        }

        pub fn deps(&self) -> DeployDeps<'_> {
            DeployDeps {
                plan: &self.plan,
                platform: self.platform.as_ref(),
                tags: &self.tags,
                shell: &self.shell,
                external: &self.external,
            }
        }
    }
}
