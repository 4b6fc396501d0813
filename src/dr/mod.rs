//! Regional Disaster Recovery
//!
//! - [`MultiClusterDrDeployer`]: hub operators, mirroring, metadata store,
//!   DRPolicy and Ramen configuration, driven from the ACM hub
//! - [`RbdDrOps`]: MirrorPeer and per-cluster RBD mirroring checks
//! - [`MetadataStore`]: where Ramen keeps its metadata (S3 only)
//! - [`ramen`]: edits to the Ramen hub operator's embedded config

pub mod deployer;
pub mod metadata_store;
pub mod ramen;
pub mod rbd;

pub use deployer::{DrReport, MultiClusterDrDeployer};
pub use metadata_store::{MetadataStore, MetadataStoreKind};
pub use rbd::RbdDrOps;

use crate::artifacts::ManifestStore;
use crate::cluster::{ClusterRegistry, ClusterRole};
use crate::error::Result;
use crate::plan::DrPlan;
use crate::poll::Poller;
use chrono::{DateTime, Utc};

pub const DR_NAMESPACE: &str = "openshift-dr-system";

/// Registry plus the run-wide helpers every fan-out step needs
#[derive(Clone, Copy)]
pub struct DrScope<'a> {
    pub registry: &'a ClusterRegistry,
    pub poller: &'a Poller,
    pub artifacts: &'a ManifestStore,
}

/// State of one DR deployment, filled in as resources are created
#[derive(Debug, Clone, PartialEq)]
pub struct DrConfiguration {
    /// Managed clusters, primary first
    pub clusters: Vec<String>,
    pub metadata_store: MetadataStoreKind,
    pub rbd: bool,
    pub mirror_peers: Vec<String>,
    pub policy_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DrConfiguration {
    pub fn new(plan: &DrPlan, registry: &ClusterRegistry) -> Result<Self> {
        let mut members = registry.non_hub();
        members.sort_by_key(|h| h.role() != ClusterRole::Primary);
        Ok(Self {
            clusters: members.iter().map(|h| h.name().to_string()).collect(),
            metadata_store: plan.metadata_store.parse()?,
            rbd: plan.rbd,
            mirror_peers: Vec::new(),
            policy_name: None,
            created_at: Utc::now(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::DrFixture;
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_configuration_puts_primary_first() {
        let fx = DrFixture::new();
        let registry = fx.registry();
        let config = fx.configuration(&registry);
        assert_eq!(config.clusters, vec!["east", "west"]);
        assert_eq!(config.metadata_store, MetadataStoreKind::S3);
        assert!(config.mirror_peers.is_empty());
        assert!(config.policy_name.is_none());
    }

    #[test]
    fn test_configuration_rejects_unknown_store() {
        let fx = DrFixture::new();
        let registry = fx.registry();
        let plan = DrPlan {
            rbd: false,
            metadata_store: "azure".into(),
        };
        assert_matches!(DrConfiguration::new(&plan, &registry), Err(Error::Configuration(_)));
    }
}
