//! Run configuration
//!
//! A deployment run is described by one YAML document with the sections
//! below. Every field has a serde default so partial files are accepted;
//! command-line flags are layered on top by the binary.

use crate::cluster::ClusterRole;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// Run Configuration
// =============================================================================

/// Complete configuration for one deployment run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub env_data: EnvData,
    pub deployment: DeploymentSection,
    pub components: Components,
    /// Participating clusters; empty means a single cluster described by `env_data`
    pub clusters: Vec<ClusterEntry>,
    pub external_mode: ExternalModeSection,
    pub reporting: Reporting,
    pub run: RunSection,
}

impl RunConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let hubs = self
            .clusters
            .iter()
            .filter(|c| c.role == ClusterRole::AcmHub)
            .count();
        if hubs > 1 {
            return Err(Error::Configuration(format!(
                "{} clusters have the acm-hub role, at most one is allowed",
                hubs
            )));
        }
        if self.clusters.len() > 1 && hubs == 0 {
            return Err(Error::Configuration(
                "multi-cluster runs need one cluster with the acm-hub role".into(),
            ));
        }
        if self.deployment.arbiter_deployment
            && !self.deployment.arbiter_autodetect
            && self.deployment.arbiter_zone.is_none()
        {
            return Err(Error::Configuration(
                "arbiter_zone is required unless arbiter_autodetect is set".into(),
            ));
        }
        Ok(())
    }

    /// Whether more than one cluster participates
    pub fn is_multicluster(&self) -> bool {
        self.clusters.len() > 1
    }

    /// Clusters of the run, synthesising the single-cluster entry when needed
    pub fn cluster_entries(&self) -> Vec<ClusterEntry> {
        if !self.clusters.is_empty() {
            return self.clusters.clone();
        }
        vec![ClusterEntry {
            name: self.env_data.cluster_name.clone(),
            kubeconfig: self.env_data.cluster_path.join("auth").join("kubeconfig"),
            role: ClusterRole::Primary,
        }]
    }

    /// Fold `--disable-components` into the component map; the CLI wins
    pub fn apply_disabled_components(&mut self, names: &[String]) -> Result<()> {
        for name in names.iter().chain(self.env_data.disable_components.clone().iter()) {
            self.components.disable(name)?;
        }
        Ok(())
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Environment of the target cluster(s)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvData {
    pub platform: String,
    pub deployment_type: String,
    pub cluster_name: String,
    pub cluster_path: PathBuf,
    pub cluster_namespace: String,
    pub storage_cluster_name: String,
    pub ocs_version: String,
    pub ocp_version: String,
    pub device_size: u32,
    pub availability_zone_count: Option<usize>,
    pub worker_availability_zones: Vec<String>,
    pub master_availability_zones: Vec<String>,
    pub worker_instance_type: Option<String>,
    pub skip_ocp_deployment: bool,
    pub skip_ocs_deployment: bool,
    pub skip_submariner_deployment: bool,
    pub mcg_only_deployment: bool,
    pub disable_components: Vec<String>,
    pub monitoring_enabled: bool,
    #[serde(rename = "persistent-monitoring")]
    pub persistent_monitoring: bool,
    pub telemeter_server_url: Option<String>,
    pub is_multus_enabled: bool,
    pub multus_public_network_interface: Option<String>,
    pub encryption_at_rest: bool,
    pub deploy_acm_hub_cluster: bool,
    pub acm_hub_unreleased: bool,
    pub acm_hub_channel: String,
    pub rbd_dr_scenario: bool,
    pub dr_metadata_store: String,
    pub huge_pages: bool,
    pub infra_replicas: Option<u32>,
    pub cephfs_name: Option<String>,
    pub rbd_name: Option<String>,
    #[serde(rename = "restricted-auth-permission")]
    pub restricted_auth_permission: bool,
    /// NTP source pushed to nodes when Ceph reports clock skew
    pub ntp_server: String,
}

impl Default for EnvData {
    fn default() -> Self {
        Self {
            platform: "aws".into(),
            deployment_type: "ipi".into(),
            cluster_name: "ocs-cluster".into(),
            cluster_path: PathBuf::from("cluster"),
            cluster_namespace: "openshift-storage".into(),
            storage_cluster_name: "ocs-storagecluster".into(),
            ocs_version: "4.12".into(),
            ocp_version: "4.12".into(),
            device_size: 512,
            availability_zone_count: None,
            worker_availability_zones: Vec::new(),
            master_availability_zones: Vec::new(),
            worker_instance_type: None,
            skip_ocp_deployment: false,
            skip_ocs_deployment: false,
            skip_submariner_deployment: false,
            mcg_only_deployment: false,
            disable_components: Vec::new(),
            monitoring_enabled: false,
            persistent_monitoring: false,
            telemeter_server_url: None,
            is_multus_enabled: false,
            multus_public_network_interface: None,
            encryption_at_rest: false,
            deploy_acm_hub_cluster: false,
            acm_hub_unreleased: false,
            acm_hub_channel: "release-2.6".into(),
            rbd_dr_scenario: false,
            dr_metadata_store: "awss3".into(),
            huge_pages: false,
            infra_replicas: None,
            cephfs_name: None,
            rbd_name: None,
            restricted_auth_permission: false,
            ntp_server: "0.rhel.pool.ntp.org".into(),
        }
    }
}

/// Install-plan approval mode of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApprovalMode {
    #[default]
    Automatic,
    Manual,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Automatic => "Automatic",
            ApprovalMode::Manual => "Manual",
        }
    }
}

/// How the storage product is deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSection {
    pub arbiter_deployment: bool,
    pub arbiter_autodetect: bool,
    pub arbiter_zone: Option<String>,
    pub local_storage: bool,
    /// LSO disk type (`ebs` or local NVMe)
    #[serde(rename = "type")]
    pub lso_type: Option<String>,
    pub local_storage_storagedeviceset_count: Option<u32>,
    pub live_deployment: bool,
    pub live_content_source: String,
    pub stage: bool,
    pub stage_rh_osbs: bool,
    pub stage_index_image: Option<String>,
    pub stage_index_image_tag: Option<String>,
    pub subscription_plan_approval: ApprovalMode,
    pub ocs_csv_channel: Option<String>,
    pub ocs_registry_image: Option<String>,
    pub default_ocs_registry_image: String,
    pub default_latest_tag: String,
    pub ocs_operator_nodes_to_label: Option<usize>,
    pub ocs_operator_nodes_to_taint: usize,
    pub infra_nodes: bool,
    pub kms_deployment: bool,
    pub host_network: bool,
    pub ceph_debug: bool,
    pub allow_lower_instance_requirements: bool,
    pub disconnected: bool,
    pub disconnected_env_skip_image_mirroring: bool,
    pub external_mode: bool,
    pub install_lvmo: bool,
    pub network_split_setup: bool,
    pub network_split_zonex_addrs: Option<String>,
    pub rook_log_level: Option<String>,
    pub dummy_zone_node_labels: bool,
    /// Registry mirroring `registry.redhat.io` in disconnected runs
    pub mirror_registry: Option<String>,
    /// vSphere only: back device sets with an eager-zeroed thick class
    pub thick_sc: bool,
    pub installer_binary: String,
}

impl Default for DeploymentSection {
    fn default() -> Self {
        Self {
            arbiter_deployment: false,
            arbiter_autodetect: false,
            arbiter_zone: None,
            local_storage: false,
            lso_type: None,
            local_storage_storagedeviceset_count: None,
            live_deployment: false,
            live_content_source: "redhat-operators".into(),
            stage: false,
            stage_rh_osbs: false,
            stage_index_image: None,
            stage_index_image_tag: None,
            subscription_plan_approval: ApprovalMode::Automatic,
            ocs_csv_channel: None,
            ocs_registry_image: None,
            default_ocs_registry_image: "quay.io/rhceph-dev/ocs-registry:latest".into(),
            default_latest_tag: "latest".into(),
            ocs_operator_nodes_to_label: None,
            ocs_operator_nodes_to_taint: 0,
            infra_nodes: false,
            kms_deployment: false,
            host_network: false,
            ceph_debug: false,
            allow_lower_instance_requirements: false,
            disconnected: false,
            disconnected_env_skip_image_mirroring: false,
            external_mode: false,
            install_lvmo: false,
            network_split_setup: false,
            network_split_zonex_addrs: None,
            rook_log_level: None,
            dummy_zone_node_labels: false,
            mirror_registry: None,
            thick_sc: false,
            installer_binary: "openshift-install".into(),
        }
    }
}

/// Storage components whose reconciliation can be switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Rgw,
    Cephfs,
    Noobaa,
    Blockpools,
}

impl Component {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "rgw" => Ok(Component::Rgw),
            "cephfs" => Ok(Component::Cephfs),
            "noobaa" => Ok(Component::Noobaa),
            "blockpools" => Ok(Component::Blockpools),
            other => Err(Error::Configuration(format!("unknown component '{}'", other))),
        }
    }

    /// Key under `spec.managedResources`; noobaa lives under `multiCloudGateway`
    pub fn managed_resource(&self) -> &'static str {
        match self {
            Component::Rgw => "cephObjectStores",
            Component::Cephfs => "cephFilesystems",
            Component::Noobaa => "multiCloudGateway",
            Component::Blockpools => "cephBlockPools",
        }
    }
}

/// Component enable/disable map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Components {
    pub disable_rgw: bool,
    pub disable_cephfs: bool,
    pub disable_noobaa: bool,
    pub disable_blockpools: bool,
}

impl Components {
    pub fn disable(&mut self, name: &str) -> Result<()> {
        match Component::parse(name)? {
            Component::Rgw => self.disable_rgw = true,
            Component::Cephfs => self.disable_cephfs = true,
            Component::Noobaa => self.disable_noobaa = true,
            Component::Blockpools => self.disable_blockpools = true,
        }
        tracing::warn!("disabling: {}", name);
        Ok(())
    }

    pub fn disabled(&self) -> Vec<Component> {
        [
            (Component::Rgw, self.disable_rgw),
            (Component::Cephfs, self.disable_cephfs),
            (Component::Noobaa, self.disable_noobaa),
            (Component::Blockpools, self.disable_blockpools),
        ]
        .into_iter()
        .filter_map(|(c, off)| off.then_some(c))
        .collect()
    }
}

/// One participating cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub name: String,
    pub kubeconfig: PathBuf,
    pub role: ClusterRole,
}

/// External Ceph cluster reached over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalModeSection {
    pub login: Login,
    pub ssh_key: Option<PathBuf>,
    pub external_cluster_node_roles: BTreeMap<String, ExternalNode>,
    pub use_fqdn_rgw_endpoint: bool,
    pub use_ipv6_rgw_endpoint: bool,
}

impl Default for ExternalModeSection {
    fn default() -> Self {
        Self {
            login: Login {
                username: "root".into(),
                password: None,
            },
            ssh_key: None,
            external_cluster_node_roles: BTreeMap::new(),
            use_fqdn_rgw_endpoint: false,
            use_ipv6_rgw_endpoint: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Login {
    pub username: String,
    pub password: Option<String>,
}

/// A node of the external Ceph cluster and the roles it carries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalNode {
    pub role: Vec<String>,
    pub hostname: String,
    pub ip_address: String,
    pub ipv6_address: Option<String>,
}

impl ExternalNode {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.iter().any(|r| r.contains(role))
    }
}

/// Build flavour reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Reporting {
    /// `DS` for downstream builds, `US` for upstream
    pub us_ds: String,
}

impl Default for Reporting {
    fn default() -> Self {
        Self { us_ds: "DS".into() }
    }
}

/// Per-run settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Directory for manifests and metrics; a temporary one when unset
    pub run_dir: Option<PathBuf>,
    pub upgrade: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RunConfig::from_yaml(
            r#"
env_data:
  platform: vsphere
  ocs_version: "4.10"
deployment:
  subscription_plan_approval: Manual
"#,
        )
        .unwrap();

        assert_eq!(config.env_data.platform, "vsphere");
        assert_eq!(config.env_data.cluster_namespace, "openshift-storage");
        assert_eq!(config.env_data.device_size, 512);
        assert_eq!(config.deployment.subscription_plan_approval, ApprovalMode::Manual);
        assert_eq!(config.deployment.live_content_source, "redhat-operators");
        assert!(!config.is_multicluster());
    }

    #[test]
    fn test_single_cluster_entry_is_synthesised() {
        let mut config = RunConfig::default();
        config.env_data.cluster_path = PathBuf::from("/clusters/c1");
        let entries = config.cluster_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kubeconfig, PathBuf::from("/clusters/c1/auth/kubeconfig"));
        assert_eq!(entries[0].role, ClusterRole::Primary);
    }

    #[test]
    fn test_multicluster_requires_a_hub() {
        let raw = r#"
clusters:
  - {name: east, kubeconfig: /k/east, role: primary}
  - {name: west, kubeconfig: /k/west, role: secondary}
"#;
        assert!(matches!(RunConfig::from_yaml(raw), Err(Error::Configuration(_))));

        let raw = r#"
clusters:
  - {name: hub, kubeconfig: /k/hub, role: acm-hub}
  - {name: east, kubeconfig: /k/east, role: primary}
  - {name: west, kubeconfig: /k/west, role: secondary}
"#;
        let config = RunConfig::from_yaml(raw).unwrap();
        assert!(config.is_multicluster());
    }

    #[test]
    fn test_arbiter_zone_required_without_autodetect() {
        let raw = "deployment: {arbiter_deployment: true}";
        assert!(RunConfig::from_yaml(raw).is_err());
        let raw = "deployment: {arbiter_deployment: true, arbiter_autodetect: true}";
        assert!(RunConfig::from_yaml(raw).is_ok());
    }

    #[test]
    fn test_cli_disabled_components_are_folded_in() {
        let mut config = RunConfig::default();
        config.env_data.disable_components = vec!["rgw".into()];
        config
            .apply_disabled_components(&["noobaa".to_string()])
            .unwrap();
        assert_eq!(config.components.disabled(), vec![Component::Rgw, Component::Noobaa]);

        assert!(config.apply_disabled_components(&["bogus".to_string()]).is_err());
    }
}
