//! vSphere: installer-provisioned clusters on thin-provisioned datastores

use super::{OpenshiftInstall, PlatformDeployer, PlatformSettings};
use crate::cluster::ClusterContext;
use crate::domain::ports::CommandRunnerRef;
use crate::error::Result;
use crate::plan::Platform;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const THIN_STORAGE_CLASS: &str = "thin";
pub const THICK_STORAGE_CLASS: &str = "thick";

pub struct VsphereDeployer {
    settings: PlatformSettings,
    runner: CommandRunnerRef,
}

impl VsphereDeployer {
    pub fn new(settings: PlatformSettings, runner: CommandRunnerRef) -> Self {
        Self { settings, runner }
    }

    fn installer(&self) -> OpenshiftInstall<'_> {
        OpenshiftInstall::new(self.runner.as_ref(), &self.settings.installer_binary)
    }
}

#[async_trait]
impl PlatformDeployer for VsphereDeployer {
    fn platform(&self) -> Platform {
        Platform::Vsphere
    }

    fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    fn default_storage_class(&self) -> Option<String> {
        Some(THIN_STORAGE_CLASS.to_string())
    }

    /// Eager-zeroed thick class for device sets when `thick_sc` is set
    fn custom_storage_class(&self) -> Option<Value> {
        self.settings.thick_sc.then(|| {
            json!({
                "apiVersion": "storage.k8s.io/v1",
                "kind": "StorageClass",
                "metadata": {"name": THICK_STORAGE_CLASS},
                "provisioner": "kubernetes.io/vsphere-volume",
                "parameters": {"diskformat": "eagerzeroedthick"},
                "reclaimPolicy": "Delete",
                "volumeBindingMode": "Immediate"
            })
        })
    }

    async fn deploy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        self.settings.require_ipi(self.platform())?;
        self.installer().create(cluster, log_level).await
    }

    async fn destroy_ocp(&self, cluster: &ClusterContext, log_level: &str) -> Result<()> {
        self.installer().destroy(cluster, log_level).await
    }
}
