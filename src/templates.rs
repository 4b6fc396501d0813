//! Base documents embedded at build time

use crate::error::Result;
use serde_json::Value;

pub const STORAGE_CLUSTER: &str = include_str!("../templates/storage_cluster.yaml");
pub const EXTERNAL_STORAGE_CLUSTER: &str = include_str!("../templates/external_storage_cluster.yaml");
pub const STORAGE_SYSTEM: &str = include_str!("../templates/storage_system.yaml");
pub const MULTUS_PUBLIC_NETWORK: &str = include_str!("../templates/multus_public_network.yaml");
pub const LVM_CLUSTER: &str = include_str!("../templates/lvm_cluster.yaml");
pub const RAMEN_HUB_CONFIG: &str = include_str!("../templates/ramen_hub_config.yaml");

/// Parse one of the embedded templates into a JSON document
pub fn load(template: &str) -> Result<Value> {
    Ok(serde_yaml::from_str(template)?)
}

pub fn storage_cluster() -> Result<Value> {
    load(STORAGE_CLUSTER)
}

pub fn external_storage_cluster() -> Result<Value> {
    load(EXTERNAL_STORAGE_CLUSTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ResourceKind;

    #[test]
    fn test_templates_parse_into_known_kinds() {
        for (template, kind) in [
            (STORAGE_CLUSTER, ResourceKind::StorageCluster),
            (EXTERNAL_STORAGE_CLUSTER, ResourceKind::StorageCluster),
            (STORAGE_SYSTEM, ResourceKind::StorageSystem),
            (MULTUS_PUBLIC_NETWORK, ResourceKind::NetworkAttachmentDefinition),
            (LVM_CLUSTER, ResourceKind::LvmCluster),
            (RAMEN_HUB_CONFIG, ResourceKind::ConfigMap),
        ] {
            let doc = load(template).unwrap();
            assert_eq!(ResourceKind::from_manifest(&doc).unwrap(), kind);
        }
    }

    #[test]
    fn test_storage_cluster_has_one_device_set() {
        let doc = storage_cluster().unwrap();
        assert_eq!(doc["spec"]["storageDeviceSets"].as_array().unwrap().len(), 1);
    }
}
