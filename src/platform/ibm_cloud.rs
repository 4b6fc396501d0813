//! IBM Cloud: managed clusters with VPC block storage

use super::{PlatformDeployer, PlatformSettings};
use crate::cluster::ClusterContext;
use crate::error::{Error, Result};
use crate::plan::Platform;
use async_trait::async_trait;
use tracing::warn;

pub const VPC_BLOCK_STORAGE_CLASS: &str = "ibmc-vpc-block-10iops-tier";

pub struct IbmCloudDeployer {
    settings: PlatformSettings,
}

impl IbmCloudDeployer {
    pub fn new(settings: PlatformSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PlatformDeployer for IbmCloudDeployer {
    fn platform(&self) -> Platform {
        Platform::IbmCloud
    }

    fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    fn default_storage_class(&self) -> Option<String> {
        Some(VPC_BLOCK_STORAGE_CLASS.to_string())
    }

    async fn deploy_ocp(&self, cluster: &ClusterContext, _log_level: &str) -> Result<()> {
        Err(Error::UnsupportedFeature(format!(
            "OCP installation on IBM Cloud ({}); clusters are provisioned by the IBM Cloud service",
            cluster.name
        )))
    }

    async fn destroy_ocp(&self, cluster: &ClusterContext, _log_level: &str) -> Result<()> {
        warn!("IBM Cloud cluster {} must be deleted through the IBM Cloud service", cluster.name);
        Ok(())
    }
}
