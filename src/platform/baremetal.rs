//! Bare metal: clusters are installed out of band, storage comes from LSO

use super::{PlatformDeployer, PlatformSettings};
use crate::cluster::ClusterContext;
use crate::error::{Error, Result};
use crate::plan::Platform;
use async_trait::async_trait;
use tracing::warn;

pub struct BaremetalDeployer {
    settings: PlatformSettings,
}

impl BaremetalDeployer {
    pub fn new(settings: PlatformSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PlatformDeployer for BaremetalDeployer {
    fn platform(&self) -> Platform {
        Platform::Baremetal
    }

    fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    fn default_storage_class(&self) -> Option<String> {
        None
    }

    async fn deploy_ocp(&self, cluster: &ClusterContext, _log_level: &str) -> Result<()> {
        Err(Error::UnsupportedFeature(format!(
            "OCP installation on bare metal ({}); provision the cluster and set skip_ocp_deployment",
            cluster.name
        )))
    }

    async fn destroy_ocp(&self, cluster: &ClusterContext, _log_level: &str) -> Result<()> {
        warn!("Bare metal cluster {} is not torn down by the deployer", cluster.name);
        Ok(())
    }
}
