//! Deployment plan
//!
//! The plan is the read-only set of decisions derived from the run
//! configuration before anything touches a cluster. Composition of the
//! StorageCluster body and every phase decision read from it.

use crate::config::{ApprovalMode, Component, RunConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Version
// =============================================================================

/// `major.minor` product version; patch levels are ignored for gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const V4_5: Version = Version::new(4, 5);
    pub const V4_6: Version = Version::new(4, 6);
    pub const V4_7: Version = Version::new(4, 7);
    pub const V4_9: Version = Version::new(4, 9);
    pub const V4_10: Version = Version::new(4, 10);
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        let mut parts = trimmed.split(|c| c == '.' || c == '-');
        let parse = |part: Option<&str>| -> Result<u32> {
            part.and_then(|p| p.parse().ok())
                .ok_or_else(|| Error::Configuration(format!("invalid version '{}'", s)))
        };
        let major = parse(parts.next())?;
        let minor = parse(parts.next())?;
        Ok(Version::new(major, minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// =============================================================================
// Platform
// =============================================================================

/// Infrastructure the cluster runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Aws,
    Vsphere,
    Baremetal,
    IbmCloud,
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Platform::Aws),
            "vsphere" => Ok(Platform::Vsphere),
            "baremetal" => Ok(Platform::Baremetal),
            "ibm_cloud" | "ibmcloud" => Ok(Platform::IbmCloud),
            other => Err(Error::Configuration(format!("unsupported platform '{}'", other))),
        }
    }
}

impl Platform {
    /// Zones assumed when neither the config nor the worker labels say
    pub fn default_zone_count(self) -> usize {
        match self {
            Platform::Vsphere | Platform::Baremetal => 1,
            Platform::Aws | Platform::IbmCloud => 3,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Aws => "aws",
            Platform::Vsphere => "vsphere",
            Platform::Baremetal => "baremetal",
            Platform::IbmCloud => "ibm_cloud",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Plan Sections
// =============================================================================

/// Arbiter (stretched) topology settings
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterPlan {
    pub autodetect: bool,
    pub zone: Option<String>,
}

/// Multus public network
#[derive(Debug, Clone, PartialEq)]
pub struct MultusPlan {
    /// Host interface backing the public network, template default when unset
    pub public_interface: Option<String>,
}

/// Regional DR settings
#[derive(Debug, Clone, PartialEq)]
pub struct DrPlan {
    pub rbd: bool,
    pub metadata_store: String,
}

/// Subscription settings shared by every operator install
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub approval: ApprovalMode,
    pub channel: Option<String>,
    pub live: bool,
    pub live_content_source: String,
    pub stage: bool,
}

/// Catalog image selection inputs
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPlan {
    pub registry_image: Option<String>,
    pub default_registry_image: String,
    pub stage_rh_osbs: bool,
    pub stage_index_image: Option<String>,
    pub stage_index_image_tag: Option<String>,
    pub downstream: bool,
    pub default_latest_tag: String,
    pub upgrade: bool,
}

/// Worker labelling and tainting
#[derive(Debug, Clone, PartialEq)]
pub struct NodePlan {
    pub to_label: Option<usize>,
    pub to_taint: usize,
    pub infra_nodes: bool,
    pub infra_replicas: bool,
    pub worker_zones: Vec<String>,
}

/// Network split between availability zones
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSplitPlan {
    pub master_zones: Vec<String>,
    pub worker_zones: Vec<String>,
    pub zone_x_addrs: Option<Vec<String>>,
}

/// ACM hub installation
#[derive(Debug, Clone, PartialEq)]
pub struct AcmHubPlan {
    pub unreleased: bool,
    pub channel: String,
}

/// Cluster monitoring backend
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringPlan {
    None,
    Persistent { telemeter_url: Option<String> },
    Telemeter { url: String },
}

// =============================================================================
// Deployment Plan
// =============================================================================

/// Read-only decisions for one run
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub platform: Platform,
    pub ocs_version: Version,
    pub ocp_version: Version,
    pub namespace: String,
    pub storage_cluster_name: String,

    // storage cluster composition
    pub arbiter: Option<ArbiterPlan>,
    pub local_storage: bool,
    pub lso_type: Option<String>,
    pub lso_device_set_count: Option<u32>,
    pub device_size_gib: u32,
    /// Configured zone count; unset means count the worker zone labels
    pub zone_count: Option<usize>,
    pub worker_instance_type: Option<String>,
    pub lower_instance_requirements: bool,
    pub host_network: bool,
    pub encryption_at_rest: bool,
    pub kms: bool,
    pub ceph_debug: bool,
    pub multus: Option<MultusPlan>,
    pub disabled_components: BTreeSet<Component>,

    // deployment modes
    pub external_mode: bool,
    pub mcg_only: bool,
    pub disconnected: bool,
    pub dr: Option<DrPlan>,

    // phases
    pub skip_ocp: bool,
    pub skip_ocs: bool,
    pub skip_submariner: bool,
    pub install_lvmo: bool,
    pub network_split: Option<NetworkSplitPlan>,
    pub acm_hub: Option<AcmHubPlan>,
    pub monitoring: MonitoringPlan,
    pub rook_log_level: Option<String>,

    pub subscription: SubscriptionPlan,
    pub catalog: CatalogPlan,
    pub nodes: NodePlan,
}

impl DeploymentPlan {
    /// Derive the plan from a validated configuration
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let env = &config.env_data;
        let dep = &config.deployment;
        let platform: Platform = env.platform.parse()?;

        let monitoring = match (
            env.monitoring_enabled,
            env.persistent_monitoring,
            env.telemeter_server_url.clone(),
        ) {
            (true, true, url) => MonitoringPlan::Persistent { telemeter_url: url },
            (true, false, Some(url)) => MonitoringPlan::Telemeter { url },
            _ => MonitoringPlan::None,
        };

        Ok(Self {
            platform,
            ocs_version: env.ocs_version.parse()?,
            ocp_version: env.ocp_version.parse()?,
            namespace: env.cluster_namespace.clone(),
            storage_cluster_name: env.storage_cluster_name.clone(),

            arbiter: dep.arbiter_deployment.then(|| ArbiterPlan {
                autodetect: dep.arbiter_autodetect,
                zone: dep.arbiter_zone.clone(),
            }),
            local_storage: dep.local_storage,
            lso_type: dep.lso_type.clone(),
            lso_device_set_count: dep.local_storage_storagedeviceset_count,
            device_size_gib: env.device_size,
            zone_count: env.availability_zone_count,
            worker_instance_type: env.worker_instance_type.clone(),
            lower_instance_requirements: dep.allow_lower_instance_requirements,
            host_network: dep.host_network,
            encryption_at_rest: env.encryption_at_rest,
            kms: dep.kms_deployment,
            ceph_debug: dep.ceph_debug,
            multus: env.is_multus_enabled.then(|| MultusPlan {
                public_interface: env.multus_public_network_interface.clone(),
            }),
            disabled_components: config.components.disabled().into_iter().collect(),

            external_mode: dep.external_mode,
            mcg_only: env.mcg_only_deployment,
            disconnected: dep.disconnected && !dep.disconnected_env_skip_image_mirroring,
            dr: config.is_multicluster().then(|| DrPlan {
                rbd: env.rbd_dr_scenario,
                metadata_store: env.dr_metadata_store.clone(),
            }),

            skip_ocp: env.skip_ocp_deployment,
            skip_ocs: env.skip_ocs_deployment,
            skip_submariner: env.skip_submariner_deployment,
            install_lvmo: dep.install_lvmo,
            network_split: dep.network_split_setup.then(|| NetworkSplitPlan {
                master_zones: env.master_availability_zones.clone(),
                worker_zones: env.worker_availability_zones.clone(),
                zone_x_addrs: dep
                    .network_split_zonex_addrs
                    .as_ref()
                    .map(|addrs| addrs.split(',').map(|a| a.trim().to_string()).collect()),
            }),
            acm_hub: env.deploy_acm_hub_cluster.then(|| AcmHubPlan {
                unreleased: env.acm_hub_unreleased,
                channel: env.acm_hub_channel.clone(),
            }),
            monitoring,
            rook_log_level: dep.rook_log_level.clone(),

            subscription: SubscriptionPlan {
                approval: dep.subscription_plan_approval,
                channel: dep.ocs_csv_channel.clone(),
                live: dep.live_deployment,
                live_content_source: dep.live_content_source.clone(),
                stage: dep.stage,
            },
            catalog: CatalogPlan {
                registry_image: dep.ocs_registry_image.clone(),
                default_registry_image: dep.default_ocs_registry_image.clone(),
                stage_rh_osbs: dep.stage_rh_osbs,
                stage_index_image: dep.stage_index_image.clone(),
                stage_index_image_tag: dep.stage_index_image_tag.clone(),
                downstream: config.reporting.us_ds == "DS",
                default_latest_tag: dep.default_latest_tag.clone(),
                upgrade: config.run.upgrade,
            },
            nodes: NodePlan {
                to_label: dep.ocs_operator_nodes_to_label,
                to_taint: dep.ocs_operator_nodes_to_taint,
                infra_nodes: dep.infra_nodes,
                infra_replicas: env.infra_replicas.is_some(),
                worker_zones: env.worker_availability_zones.clone(),
            },
        })
    }

    pub fn is_arbiter(&self) -> bool {
        self.arbiter.is_some()
    }

    pub fn component_disabled(&self, component: Component) -> bool {
        self.disabled_components.contains(&component)
    }

    /// Whether the odf-operator (rather than ocs-operator) is the entry point
    pub fn uses_odf_operator(&self) -> bool {
        self.ocs_version >= Version::V4_9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_order() {
        assert_eq!("4.10".parse::<Version>().unwrap(), Version::V4_10);
        assert_eq!("v4.9.3".parse::<Version>().unwrap(), Version::V4_9);
        assert_eq!("4.11.0-105".parse::<Version>().unwrap(), Version::new(4, 11));
        assert!(Version::V4_10 > Version::V4_9);
        assert!("four".parse::<Version>().is_err());
        assert_eq!(Version::V4_10.to_string(), "4.10");
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("AWS".parse::<Platform>().unwrap(), Platform::Aws);
        assert_eq!("ibm_cloud".parse::<Platform>().unwrap(), Platform::IbmCloud);
        assert!("azure".parse::<Platform>().is_err());
    }

    #[test]
    fn test_plan_from_config() {
        let config = RunConfig::from_yaml(
            r#"
env_data:
  platform: vsphere
  ocs_version: "4.10"
  monitoring_enabled: true
  telemeter_server_url: https://telemeter.example.com
deployment:
  arbiter_deployment: true
  arbiter_zone: c
  network_split_setup: true
  network_split_zonex_addrs: "10.1.0.1, 10.1.0.2"
components:
  disable_cephfs: true
"#,
        )
        .unwrap();

        let plan = DeploymentPlan::from_config(&config).unwrap();
        assert_eq!(plan.platform, Platform::Vsphere);
        assert_eq!(plan.zone_count, None);
        assert_eq!(plan.platform.default_zone_count(), 1);
        assert_eq!(plan.arbiter.as_ref().unwrap().zone.as_deref(), Some("c"));
        assert!(plan.component_disabled(Component::Cephfs));
        assert!(plan.dr.is_none());
        assert_eq!(
            plan.monitoring,
            MonitoringPlan::Telemeter {
                url: "https://telemeter.example.com".into()
            }
        );
        assert_eq!(
            plan.network_split.unwrap().zone_x_addrs.unwrap(),
            vec!["10.1.0.1".to_string(), "10.1.0.2".to_string()]
        );
        assert!(plan.catalog.downstream);
    }
}
