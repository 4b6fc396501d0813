//! Regional DR resources
//!
//! MirrorPeer pairs storage clusters for RBD mirroring; DRPolicy binds the
//! participating clusters to their S3 metadata-store profiles.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// MirrorPeer
// =============================================================================

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "multicluster.odf.openshift.io",
    version = "v1alpha1",
    kind = "MirrorPeer",
    plural = "mirrorpeers",
    status = "MirrorPeerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MirrorPeerSpec {
    /// Peered clusters, primary first
    pub items: Vec<PeerRef>,

    #[serde(default)]
    pub manage_s3: bool,

    #[serde(default, rename = "type")]
    pub replication_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    pub cluster_name: String,
    pub storage_cluster_ref: StorageClusterRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StorageClusterRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MirrorPeerStatus {
    #[serde(default)]
    pub phase: String,
}

// =============================================================================
// DRPolicy
// =============================================================================

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ramendr.openshift.io",
    version = "v1alpha1",
    kind = "DRPolicy",
    plural = "drpolicies",
    status = "DRPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DRPolicySpec {
    pub dr_cluster_set: Vec<DrClusterEntry>,

    /// Replication interval such as `5m`
    pub scheduling_interval: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DrClusterEntry {
    pub name: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub s3_profile_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DRPolicyStatus {
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(default, rename = "type")]
    pub condition_type: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub status: String,
}

impl DRPolicy {
    /// Reason of the first status condition, empty until reported
    pub fn first_reason(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .map(|c| c.reason.as_str())
            .unwrap_or_default()
    }
}
