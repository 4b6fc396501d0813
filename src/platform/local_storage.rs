//! Local Storage Operator
//!
//! Installs LSO into its own namespace, discovers disks on the storage
//! nodes through a LocalVolumeSet and waits for the resulting `localblock`
//! storage class and its first PVs.

use crate::cluster::ClusterOps;
use crate::composer::LSO_STORAGE_CLASS;
use crate::document::str_at;
use crate::domain::ports::ResourceKind;
use crate::error::Result;
use crate::olm::OperatorRequest;
use crate::poll::{PollTarget, Probe};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const LSO_NAMESPACE: &str = "openshift-local-storage";
pub const LSO_PACKAGE: &str = "local-storage-operator";
pub const STORAGE_NODE_LABEL: &str = "cluster.ocs.openshift.io/openshift-storage";
const LOCAL_VOLUME_SET: &str = "localblock";
const STORAGE_CLASS_TIMEOUT: Duration = Duration::from_secs(300);
const PV_TIMEOUT: Duration = Duration::from_secs(600);

pub fn local_volume_set() -> Value {
    json!({
        "apiVersion": "local.storage.openshift.io/v1alpha1",
        "kind": "LocalVolumeSet",
        "metadata": {"name": LOCAL_VOLUME_SET, "namespace": LSO_NAMESPACE},
        "spec": {
            "nodeSelector": {
                "nodeSelectorTerms": [{
                    "matchExpressions": [{"key": STORAGE_NODE_LABEL, "operator": "Exists"}]
                }]
            },
            "storageClassName": LSO_STORAGE_CLASS,
            "volumeMode": "Block",
            "deviceInclusionSpec": {
                "deviceTypes": ["disk", "part"],
                "minSize": "100Gi"
            }
        }
    })
}

/// Install LSO from `source` and wait until local PVs are served
pub async fn setup(ops: &ClusterOps<'_>, source: &str) -> Result<()> {
    info!("Setting up local storage on {}", ops.cluster);
    let installer = ops.installer();
    installer
        .ensure_namespace(LSO_NAMESPACE, json!({"openshift.io/cluster-monitoring": "true"}))
        .await?;
    installer
        .ensure_operator_group(LSO_NAMESPACE, "local-operator-group", vec![LSO_NAMESPACE.to_string()])
        .await?;
    installer
        .install(&OperatorRequest::new(LSO_PACKAGE, LSO_NAMESPACE, source))
        .await?;

    installer
        .apply_recorded("local_volume_set_manifest", &local_volume_set())
        .await?;

    let client = ops.client;
    let target = PollTarget::new("StorageClass", LSO_STORAGE_CLASS, "present");
    ops.poller
        .until(&target, Duration::from_secs(10), STORAGE_CLASS_TIMEOUT, || async move {
            client.get(ResourceKind::StorageClass, None, LSO_STORAGE_CLASS).await?;
            Ok(Probe::Ready(()))
        })
        .await?;

    let target = PollTarget::new("PersistentVolume", LSO_STORAGE_CLASS, "available");
    let count = ops
        .poller
        .until(&target, Duration::from_secs(10), PV_TIMEOUT, || async move {
            let volumes = client.list(ResourceKind::PersistentVolume, None, None).await?;
            let count = volumes
                .iter()
                .filter(|pv| str_at(pv, "/spec/storageClassName") == Some(LSO_STORAGE_CLASS))
                .count();
            Ok(if count > 0 {
                Probe::Ready(count)
            } else {
                Probe::Pending("no local PVs".into())
            })
        })
        .await?;
    info!("{} local PVs available on {}", count, ops.cluster);
    Ok(())
}
