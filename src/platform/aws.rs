//! AWS: installer-provisioned clusters backed by EBS

use super::{OpenshiftInstall, PlatformDeployer, PlatformSettings};
use crate::cluster::ClusterContext;
use crate::domain::ports::CommandRunnerRef;
use crate::error::Result;
use crate::plan::{Platform, Version};
use async_trait::async_trait;

/// CSI-backed gp2 became the default class in 4.12
const GP2_CSI_SINCE: Version = Version::new(4, 12);

pub struct AwsDeployer {
    settings: PlatformSettings,
    runner: CommandRunnerRef,
}

impl AwsDeployer {
    pub fn new(settings: PlatformSettings, runner: CommandRunnerRef) -> Self {
        Self { settings, runner }
    }

    fn installer(&self) -> OpenshiftInstall<'_> {
        OpenshiftInstall::new(self.runner.as_ref(), &self.settings.installer_binary)
    }
}

#[async_trait]
impl PlatformDeployer for AwsDeployer {
    fn platform(&self) -> Platform {
        Platform::Aws
    }

    fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    fn default_storage_class(&self) -> Option<String> {
        let class = if self.settings.ocp_version >= GP2_CSI_SINCE {
            "gp2-csi"
        } else {
            "gp2"
        };
        Some(class.to_string())
    }

    async fn deploy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        self.settings.require_ipi(self.platform())?;
        self.installer().create(cluster, log_level).await
    }

    async fn destroy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        self.installer().destroy(cluster, log_level).await
    }
}
