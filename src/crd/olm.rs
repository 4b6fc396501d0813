//! Operator Lifecycle Manager resources
//!
//! Typed bodies for the OLM objects the installer writes (Subscription,
//! CatalogSource, OperatorGroup, ImageContentSourcePolicy) and the
//! InstallPlan it approves.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Subscription
// =============================================================================

/// Subscription to an operator package on a channel
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    shortname = "sub",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Package name in the catalog
    pub name: String,

    pub channel: String,

    /// Catalog source providing the package
    pub source: String,

    pub source_namespace: String,

    /// `Automatic` or `Manual`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,

    /// Pin the first CSV installed from the channel
    #[serde(default, rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
}

// =============================================================================
// InstallPlan
// =============================================================================

/// InstallPlan created by OLM for a subscription
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    shortname = "ip",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    #[serde(default)]
    pub approval: String,

    #[serde(default)]
    pub approved: bool,

    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
}

// =============================================================================
// CatalogSource
// =============================================================================

/// Package index operators are installed from
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    shortname = "catsrc",
    status = "CatalogSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    pub source_type: String,

    pub image: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub publisher: String,

    /// Pull secrets for the index image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    #[serde(default)]
    pub connection_state: Option<ConnectionState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(default)]
    pub last_observed_state: String,
}

impl CatalogSource {
    /// `status.connectionState.lastObservedState`, empty until OLM reports
    pub fn observed_state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.connection_state.as_ref())
            .map(|c| c.last_observed_state.as_str())
            .unwrap_or_default()
    }
}

// =============================================================================
// OperatorGroup
// =============================================================================

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    shortname = "og",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Namespaces the operators watch; empty means all namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

// =============================================================================
// ImageContentSourcePolicy
// =============================================================================

/// Registry mirrors applied cluster-wide through machine configs
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1alpha1",
    kind = "ImageContentSourcePolicy",
    plural = "imagecontentsourcepolicies",
    shortname = "icsp"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageContentSourcePolicySpec {
    pub repository_digest_mirrors: Vec<RepositoryDigestMirror>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryDigestMirror {
    pub source: String,
    pub mirrors: Vec<String>,
}
