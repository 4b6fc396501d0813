//! StorageCluster overlays
//!
//! Each overlay reads the plan and the platform defaults and mutates the
//! document in place. They are plain functions so they can be exercised one
//! at a time; [`super::OVERLAYS`] fixes the order they run in.

use super::{PlatformDefaults, StorageClusterSpec};
use crate::config::Component;
use crate::error::{Error, Result};
use crate::plan::{DeploymentPlan, Platform, Version};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// AWS instance type with local NVMe that needs an explicit resource block
pub const AWS_LSO_WORKER_INSTANCE: &str = "i3en.2xlarge";
pub const AWS_EBS: &str = "ebs";
pub const LSO_DEVICE_SET_NAME: &str = "ocs-deviceset";
pub const LOCAL_DEVICES_ANNOTATION: &str = "cluster.ocs.openshift.io/local-devices";

/// Components whose requests and limits are cleared for small instances
const LOWER_INSTANCE_COMPONENTS: [&str; 6] = ["mon", "mds", "rgw", "mgr", "noobaa-core", "noobaa-db"];

fn unset_resources() -> Value {
    json!({"Requests": null, "Limits": null})
}

fn limits(cpu_limit: u32, cpu_request: u32, memory: &str) -> Value {
    json!({
        "limits": {"cpu": cpu_limit, "memory": memory},
        "requests": {"cpu": cpu_request, "memory": memory}
    })
}

// =============================================================================
// Components and Topology
// =============================================================================

/// Switch off reconciliation of disabled components
pub fn components(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    for component in &plan.disabled_components {
        let overlay = match component {
            Component::Noobaa => json!({"multiCloudGateway": {"reconcileStrategy": "ignore"}}),
            other => json!({
                "managedResources": {other.managed_resource(): {"reconcileStrategy": "ignore"}}
            }),
        };
        spec.merge_spec(&overlay);
    }
    Ok(())
}

/// Stretched cluster with an arbiter zone
pub fn arbiter(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<()> {
    if !plan.is_arbiter() {
        return Ok(());
    }
    let location = defaults
        .arbiter_location
        .clone()
        .ok_or_else(|| Error::UnavailableResource("no arbiter zone resolved".into()))?;
    spec.set(&["spec", "arbiter"], json!({"enable": true}))?;
    spec.set(&["spec", "nodeTopologies"], json!({"arbiterLocation": location}))?;
    spec.device_set_mut()?["replica"] = json!(4);
    Ok(())
}

/// Flexible scaling for local storage spread over fewer than three zones.
/// Never combined with an arbiter. A configured zone count wins over the
/// count taken from the worker labels.
pub fn flexible_scaling(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<()> {
    let zones = plan
        .zone_count
        .or(defaults.worker_zone_count)
        .unwrap_or_else(|| plan.platform.default_zone_count());
    if plan.local_storage
        && plan.ocs_version >= Version::V4_7
        && zones < 3
        && !plan.is_arbiter()
    {
        info!("Enabling flexible scaling for {} zone(s)", zones);
        spec.set(&["spec", "flexibleScaling"], json!(true))?;
        let device_set = spec.device_set_mut()?;
        device_set["count"] = json!(3);
        device_set["replica"] = json!(1);
    }
    Ok(())
}

// =============================================================================
// Device Sets
// =============================================================================

/// Requested capacity and storage class of the device set
pub fn device_size(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<()> {
    let storage = if plan.platform == Platform::Baremetal {
        defaults
            .smallest_pv_size
            .clone()
            .ok_or_else(|| Error::UnavailableResource("no local PVs to size the device set".into()))?
    } else {
        format!("{}Gi", plan.device_size_gib)
    };

    let device_set = spec.device_set_mut()?;
    device_set["dataPVCTemplate"]["spec"]["resources"]["requests"]["storage"] = json!(storage);
    if let Some(class) = &defaults.storage_class {
        device_set["dataPVCTemplate"]["spec"]["storageClassName"] = json!(class);
    }
    Ok(())
}

/// Local Storage Operator backed device set
pub fn local_storage(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<()> {
    if !plan.local_storage {
        return Ok(());
    }
    spec.set(&["spec", "manageNodes"], json!(false))?;
    spec.set(&["spec", "monDataDirHostPath"], json!("/var/lib/rook"))?;

    let device_set = spec.device_set_mut()?;
    device_set["name"] = json!(LSO_DEVICE_SET_NAME);
    device_set["portable"] = json!(false);
    device_set["dataPVCTemplate"]["spec"]["storageClassName"] = json!(defaults.lso_storage_class);
    if plan.platform == Platform::Aws && plan.lso_type.as_deref() != Some(AWS_EBS) {
        device_set["count"] = json!(2);
    }
    if plan.ocs_version >= Version::V4_5
        && plan.worker_instance_type.as_deref() == Some(AWS_LSO_WORKER_INSTANCE)
    {
        device_set["resources"] = limits(2, 1, "5Gi");
    }
    if let Some(count) = plan.lso_device_set_count {
        device_set["count"] = json!(count);
    }

    if plan.ocp_version >= Version::V4_6 && plan.ocs_version >= Version::V4_6 {
        spec.set(&["metadata", "annotations"], json!({LOCAL_DEVICES_ANNOTATION: "true"}))?;
    }
    Ok(())
}

// =============================================================================
// Resources
// =============================================================================

/// Clear requests and limits for small instances, or apply the LSO on AWS
/// preset. The override and the preset are exclusive; the override wins.
pub fn resources(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    if plan.lower_instance_requirements {
        info!("Allowing lower instance requirements");
        spec.device_set_mut()?["resources"] = unset_resources();

        let mut components: serde_json::Map<String, Value> = LOWER_INSTANCE_COMPONENTS
            .iter()
            .map(|c| (c.to_string(), unset_resources()))
            .collect();
        if plan.ocs_version >= Version::V4_5 {
            components.insert("noobaa-endpoint".into(), limits(1, 1, "500Mi"));
        }
        spec.set(&["spec", "resources"], Value::Object(components))?;
    } else if plan.local_storage && plan.platform == Platform::Aws {
        let mut preset = json!({"mds": limits(3, 1, "8Gi")});
        if plan.ocs_version < Version::V4_5 {
            preset["noobaa-core"] = limits(2, 1, "8Gi");
            preset["noobaa-db"] = limits(2, 1, "8Gi");
        }
        spec.set(&["spec", "resources"], preset)?;
    }
    Ok(())
}

// =============================================================================
// Networking and Security
// =============================================================================

pub fn host_network(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    if plan.host_network {
        spec.set(&["spec", "hostNetwork"], json!(true))?;
    }
    Ok(())
}

/// IBM Cloud keeps mon data on a PVC
pub fn ibm_cloud(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, defaults: &PlatformDefaults) -> Result<()> {
    if plan.platform != Platform::IbmCloud {
        return Ok(());
    }
    spec.set(
        &["spec", "monPVCTemplate"],
        json!({
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": {"requests": {"storage": "20Gi"}},
                "storageClassName": defaults.storage_class,
                "volumeMode": "Filesystem"
            }
        }),
    )?;
    spec.set(&["spec", "manageNodes"], json!(false))
}

pub fn encryption(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    if !plan.encryption_at_rest {
        return Ok(());
    }
    if plan.ocs_version < Version::V4_6 {
        let message = "Encryption at REST can be enabled only on OCS >= 4.6!";
        error!("{}", message);
        return Err(Error::UnsupportedFeature(message.into()));
    }
    info!("Enabling encryption at REST!");
    let mut encryption = if plan.ocs_version >= Version::V4_10 {
        json!({"clusterWide": true})
    } else {
        json!({"enable": true})
    };
    if plan.kms {
        encryption["kms"] = json!({"enable": true});
    }
    spec.set(&["spec", "encryption"], encryption)
}

/// Leave ceph config to the debug config map
pub fn ceph_debug(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    if plan.ceph_debug {
        warn!("Ceph debug enabled, cephConfig will not be reconciled");
        spec.merge_spec(&json!({"managedResources": {"cephConfig": {"reconcileStrategy": "ignore"}}}));
    }
    Ok(())
}

pub fn multus(spec: &mut StorageClusterSpec, plan: &DeploymentPlan, _: &PlatformDefaults) -> Result<()> {
    if plan.multus.is_none() {
        return Ok(());
    }
    spec.set(
        &["spec", "network"],
        json!({
            "provider": "multus",
            "selectors": {"public": format!("{}/ocs-public", plan.namespace)}
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::tests::{defaults, plan};
    use crate::templates;
    use assert_matches::assert_matches;

    fn base() -> StorageClusterSpec {
        StorageClusterSpec::new(templates::storage_cluster().unwrap())
    }

    fn apply(
        overlay: fn(&mut StorageClusterSpec, &DeploymentPlan, &PlatformDefaults) -> Result<()>,
        yaml: &str,
    ) -> Value {
        let mut spec = base();
        overlay(&mut spec, &plan(yaml), &defaults()).unwrap();
        spec.into_value()
    }

    #[test]
    fn test_components_overlay() {
        let doc = apply(
            components,
            "components:\n  disable_noobaa: true\n  disable_cephfs: true\n",
        );
        assert_eq!(doc["spec"]["multiCloudGateway"]["reconcileStrategy"], "ignore");
        assert_eq!(
            doc["spec"]["managedResources"]["cephFilesystems"]["reconcileStrategy"],
            "ignore"
        );
        assert!(doc["spec"]["managedResources"].get("multiCloudGateway").is_none());
    }

    #[test]
    fn test_arbiter_overlay() {
        let doc = apply(arbiter, "deployment:\n  arbiter_deployment: true\n  arbiter_zone: c\n");
        assert_eq!(doc["spec"]["arbiter"]["enable"], true);
        assert_eq!(doc["spec"]["nodeTopologies"]["arbiterLocation"], "us-east-2c");
        assert_eq!(doc["spec"]["storageDeviceSets"][0]["replica"], 4);
    }

    #[test]
    fn test_arbiter_without_zone_fails() {
        let mut spec = base();
        let mut missing = defaults();
        missing.arbiter_location = None;
        let plan = plan("deployment:\n  arbiter_deployment: true\n  arbiter_autodetect: true\n");
        let err = arbiter(&mut spec, &plan, &missing).unwrap_err();
        assert_matches!(err, Error::UnavailableResource(_));
    }

    #[test]
    fn test_flexible_scaling_overlay() {
        let doc = apply(
            flexible_scaling,
            "env_data:\n  platform: vsphere\n  ocs_version: '4.8'\ndeployment:\n  local_storage: true\n",
        );
        assert_eq!(doc["spec"]["flexibleScaling"], true);
        assert_eq!(doc["spec"]["storageDeviceSets"][0]["count"], 3);
        assert_eq!(doc["spec"]["storageDeviceSets"][0]["replica"], 1);

        let old = apply(
            flexible_scaling,
            "env_data:\n  platform: vsphere\n  ocs_version: '4.6'\ndeployment:\n  local_storage: true\n",
        );
        assert!(old["spec"].get("flexibleScaling").is_none());
    }

    #[test]
    fn test_device_size_on_baremetal_uses_smallest_pv() {
        let doc = apply(device_size, "env_data:\n  platform: baremetal\n");
        let pvc = &doc["spec"]["storageDeviceSets"][0]["dataPVCTemplate"]["spec"];
        assert_eq!(pvc["resources"]["requests"]["storage"], "300Gi");
        assert_eq!(pvc["storageClassName"], "gp2-csi");
    }

    #[test]
    fn test_local_storage_overlay_on_aws_i3() {
        let doc = apply(
            local_storage,
            "env_data:\n  worker_instance_type: i3en.2xlarge\ndeployment:\n  local_storage: true\n",
        );
        let device_set = &doc["spec"]["storageDeviceSets"][0];
        assert_eq!(doc["spec"]["manageNodes"], false);
        assert_eq!(doc["spec"]["monDataDirHostPath"], "/var/lib/rook");
        assert_eq!(device_set["name"], LSO_DEVICE_SET_NAME);
        assert_eq!(device_set["portable"], false);
        assert_eq!(device_set["count"], 2);
        assert_eq!(device_set["dataPVCTemplate"]["spec"]["storageClassName"], "localblock");
        assert_eq!(device_set["resources"]["limits"]["cpu"], 2);
        assert_eq!(device_set["resources"]["requests"]["memory"], "5Gi");
        assert_eq!(doc["metadata"]["annotations"][LOCAL_DEVICES_ANNOTATION], "true");
    }

    #[test]
    fn test_local_storage_count_override() {
        let doc = apply(
            local_storage,
            "deployment:\n  local_storage: true\n  type: ebs\n  local_storage_storagedeviceset_count: 5\n",
        );
        assert_eq!(doc["spec"]["storageDeviceSets"][0]["count"], 5);
    }

    #[test]
    fn test_lower_instance_requirements_overlay() {
        let doc = apply(resources, "deployment:\n  allow_lower_instance_requirements: true\n");
        assert_eq!(
            doc["spec"]["storageDeviceSets"][0]["resources"],
            json!({"Requests": null, "Limits": null})
        );
        for component in LOWER_INSTANCE_COMPONENTS {
            assert_eq!(doc["spec"]["resources"][component], json!({"Requests": null, "Limits": null}));
        }
        assert_eq!(doc["spec"]["resources"]["noobaa-endpoint"]["limits"]["memory"], "500Mi");
    }

    #[test]
    fn test_lso_aws_preset() {
        let doc = apply(resources, "env_data:\n  ocs_version: '4.4'\ndeployment:\n  local_storage: true\n");
        assert_eq!(doc["spec"]["resources"]["mds"]["limits"]["cpu"], 3);
        assert_eq!(doc["spec"]["resources"]["noobaa-db"]["requests"]["memory"], "8Gi");

        let current = apply(resources, "deployment:\n  local_storage: true\n");
        assert!(current["spec"]["resources"].get("noobaa-core").is_none());
    }

    #[test]
    fn test_lower_instance_override_beats_preset() {
        let doc = apply(
            resources,
            "deployment:\n  local_storage: true\n  allow_lower_instance_requirements: true\n",
        );
        assert_eq!(doc["spec"]["resources"]["mds"], json!({"Requests": null, "Limits": null}));
    }

    #[test]
    fn test_host_network_overlay() {
        let doc = apply(host_network, "deployment:\n  host_network: true\n");
        assert_eq!(doc["spec"]["hostNetwork"], true);
    }

    #[test]
    fn test_ibm_cloud_overlay() {
        let doc = apply(ibm_cloud, "env_data:\n  platform: ibm_cloud\n");
        assert_eq!(doc["spec"]["monPVCTemplate"]["spec"]["resources"]["requests"]["storage"], "20Gi");
        assert_eq!(doc["spec"]["monPVCTemplate"]["spec"]["storageClassName"], "gp2-csi");
        assert_eq!(doc["spec"]["manageNodes"], false);
    }

    #[test]
    fn test_encryption_overlay() {
        let cluster_wide = apply(
            encryption,
            "env_data:\n  encryption_at_rest: true\ndeployment:\n  kms_deployment: true\n",
        );
        assert_eq!(
            cluster_wide["spec"]["encryption"],
            json!({"clusterWide": true, "kms": {"enable": true}})
        );

        let legacy = apply(encryption, "env_data:\n  encryption_at_rest: true\n  ocs_version: '4.8'\n");
        assert_eq!(legacy["spec"]["encryption"], json!({"enable": true}));
    }

    #[test]
    fn test_encryption_unsupported_below_4_6() {
        let mut spec = base();
        let plan = plan("env_data:\n  encryption_at_rest: true\n  ocs_version: '4.5'\n");
        let err = encryption(&mut spec, &plan, &defaults()).unwrap_err();
        assert_matches!(err, Error::UnsupportedFeature(_));
    }

    #[test]
    fn test_ceph_debug_keeps_disabled_components() {
        let mut spec = base();
        let plan = plan("components:\n  disable_rgw: true\ndeployment:\n  ceph_debug: true\n");
        components(&mut spec, &plan, &defaults()).unwrap();
        ceph_debug(&mut spec, &plan, &defaults()).unwrap();
        let managed = &spec.value()["spec"]["managedResources"];
        assert_eq!(managed["cephConfig"]["reconcileStrategy"], "ignore");
        assert_eq!(managed["cephObjectStores"]["reconcileStrategy"], "ignore");
    }

    #[test]
    fn test_multus_overlay() {
        let doc = apply(multus, "env_data:\n  is_multus_enabled: true\n");
        assert_eq!(doc["spec"]["network"]["provider"], "multus");
        assert_eq!(doc["spec"]["network"]["selectors"]["public"], "openshift-storage/ocs-public");
    }
}
