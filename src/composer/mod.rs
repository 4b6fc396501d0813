//! Storage Cluster Composer
//!
//! Builds the StorageCluster body from the base template and the
//! deployment plan. Composition is a pure function: the same template,
//! plan and platform defaults always produce the same document.
//!
//! # Overlay Order
//!
//! ```text
//! components → arbiter → flexible scaling → device size → local storage
//!            → resources → host network → ibm cloud → encryption
//!            → ceph debug → multus
//! ```
//!
//! Later overlays win. Arbiter and flexible scaling are exclusive: flexible
//! scaling only applies when no arbiter is planned.

pub mod overlays;

use crate::document::{deep_merge, set_path};
use crate::error::{Error, Result};
use crate::plan::DeploymentPlan;
use serde_json::Value;
use tracing::debug;

/// Storage class backing LSO device sets
pub const LSO_STORAGE_CLASS: &str = "localblock";

/// Values the composer takes from the platform and the live cluster
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformDefaults {
    /// Default storage class of the platform, if it has one
    pub storage_class: Option<String>,
    pub lso_storage_class: String,
    /// Smallest local PV, used to size bare metal device sets
    pub smallest_pv_size: Option<String>,
    /// Zone hosting the arbiter, resolved before composition
    pub arbiter_location: Option<String>,
    /// Distinct zones among the worker nodes
    pub worker_zone_count: Option<usize>,
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self {
            storage_class: None,
            lso_storage_class: LSO_STORAGE_CLASS.to_string(),
            smallest_pv_size: None,
            arbiter_location: None,
            worker_zone_count: None,
        }
    }
}

// =============================================================================
// StorageCluster Document
// =============================================================================

/// StorageCluster body under construction
#[derive(Debug, Clone, PartialEq)]
pub struct StorageClusterSpec {
    doc: Value,
}

impl StorageClusterSpec {
    pub fn new(doc: Value) -> Self {
        Self { doc }
    }

    pub fn value(&self) -> &Value {
        &self.doc
    }

    pub fn into_value(self) -> Value {
        self.doc
    }

    pub fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
        set_path(&mut self.doc, path, value)
    }

    /// Deep-merge `overlay` into `spec`
    pub fn merge_spec(&mut self, overlay: &Value) {
        match self.doc.get_mut("spec") {
            Some(spec) => deep_merge(spec, overlay),
            None => {
                self.doc["spec"] = overlay.clone();
            }
        }
    }

    /// The single device set of the cluster
    pub fn device_set_mut(&mut self) -> Result<&mut Value> {
        self.doc
            .pointer_mut("/spec/storageDeviceSets/0")
            .ok_or_else(|| Error::Configuration("StorageCluster template has no device set".into()))
    }

    pub fn flexible_scaling(&self) -> bool {
        self.doc.pointer("/spec/flexibleScaling") == Some(&Value::Bool(true))
    }
}

// =============================================================================
// Composition
// =============================================================================

pub type Overlay = fn(&mut StorageClusterSpec, &DeploymentPlan, &PlatformDefaults) -> Result<()>;

/// Overlays in application order
pub const OVERLAYS: [(&str, Overlay); 11] = [
    ("components", overlays::components),
    ("arbiter", overlays::arbiter),
    ("flexible_scaling", overlays::flexible_scaling),
    ("device_size", overlays::device_size),
    ("local_storage", overlays::local_storage),
    ("resources", overlays::resources),
    ("host_network", overlays::host_network),
    ("ibm_cloud", overlays::ibm_cloud),
    ("encryption", overlays::encryption),
    ("ceph_debug", overlays::ceph_debug),
    ("multus", overlays::multus),
];

/// Compose the StorageCluster for one cluster
pub fn compose(base: &Value, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<StorageClusterSpec> {
    let mut spec = StorageClusterSpec::new(base.clone());
    spec.set(&["metadata", "name"], Value::String(plan.storage_cluster_name.clone()))?;
    spec.set(&["metadata", "namespace"], Value::String(plan.namespace.clone()))?;

    for (name, overlay) in OVERLAYS {
        debug!("Applying StorageCluster overlay {}", name);
        overlay(&mut spec, plan, defaults)?;
    }
    Ok(spec)
}
