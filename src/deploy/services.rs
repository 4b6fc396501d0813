//! Cluster services rewired onto the new storage
//!
//! Image registry, cluster monitoring, the console plugin and the default
//! storage class are adjusted after the storage cluster is up.

use crate::cluster::ClusterOps;
use crate::document::phase_of;
use crate::domain::ports::ResourceKind;
use crate::error::Result;
use crate::plan::MonitoringPlan;
use crate::poll::{retry, PollTarget, Probe};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub const REGISTRY_NAMESPACE: &str = "openshift-image-registry";
pub const REGISTRY_PVC: &str = "registry-cephfs-rwx-pvc";
pub const REGISTRY_PVC_SIZE: &str = "100Gi";
pub const MONITORING_NAMESPACE: &str = "openshift-monitoring";
pub const MONITORING_CONFIG: &str = "cluster-monitoring-config";
pub const MONITORING_PVC_SIZE: &str = "40Gi";
pub const CONSOLE_PLUGIN: &str = "odf-console";
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
pub const NODE_SELECTOR_ANNOTATION: &str = "openshift.io/node-selector";
const MONITORING_TRIES: u32 = 8;
const MONITORING_DELAY: Duration = Duration::from_secs(3);
const MONITORING_PVC_TIMEOUT: Duration = Duration::from_secs(600);

/// Make the image registry operator manage its deployment
pub async fn set_registry_managed(ops: &ClusterOps<'_>) -> Result<()> {
    ops.client
        .patch(
            ResourceKind::ImageRegistryConfig,
            None,
            "cluster",
            &json!({"spec": {"managementState": "Managed"}}),
        )
        .await?;
    info!("Image registry on {} is Managed", ops.cluster);
    Ok(())
}

/// Back the image registry with an RWX CephFS claim
pub async fn registry_to_cephfs(ops: &ClusterOps<'_>, cephfs_class: &str) -> Result<()> {
    let claim = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": REGISTRY_PVC, "namespace": REGISTRY_NAMESPACE},
        "spec": {
            "accessModes": ["ReadWriteMany"],
            "storageClassName": cephfs_class,
            "resources": {"requests": {"storage": REGISTRY_PVC_SIZE}}
        }
    });
    ops.artifacts.record("registry_pvc_manifest", &claim)?;
    ops.client.create_if_absent(&claim).await?;
    ops.client
        .patch(
            ResourceKind::ImageRegistryConfig,
            None,
            "cluster",
            &json!({"spec": {"storage": {"emptyDir": null, "pvc": {"claim": REGISTRY_PVC}}}}),
        )
        .await?;
    info!("Image registry on {} now uses {}", ops.cluster, cephfs_class);
    Ok(())
}

/// Render `config.yaml` of the cluster monitoring config map
pub fn monitoring_config(storage_class: Option<&str>, telemeter_url: Option<&str>) -> Result<String> {
    let mut config = json!({});
    if let Some(class) = storage_class {
        let claim = json!({
            "volumeClaimTemplate": {
                "metadata": {"name": "my-prometheus-claim"},
                "spec": {
                    "storageClassName": class,
                    "resources": {"requests": {"storage": MONITORING_PVC_SIZE}}
                }
            }
        });
        config["prometheusK8s"] = claim.clone();
        config["alertmanagerMain"] = claim;
    }
    if let Some(url) = telemeter_url {
        config["telemeterClient"] = json!({"telemeterServerURL": url});
    }
    Ok(serde_yaml::to_string(&config)?)
}

async fn apply_monitoring_config(ops: &ClusterOps<'_>, config: &str) -> Result<()> {
    let map = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": MONITORING_CONFIG, "namespace": MONITORING_NAMESPACE},
        "data": {"config.yaml": config}
    });
    ops.artifacts.record("monitoring_config_manifest", &map)?;
    ops.client.apply(&map).await?;
    Ok(())
}

/// Wait until the monitoring stack's claims are bound
async fn wait_for_monitoring_claims(ops: &ClusterOps<'_>) -> Result<()> {
    let client = ops.client;
    let target = PollTarget::new("PersistentVolumeClaim", MONITORING_NAMESPACE, "Bound");
    ops.poller
        .until(&target, Duration::from_secs(10), MONITORING_PVC_TIMEOUT, || async move {
            let claims = client
                .list(ResourceKind::PersistentVolumeClaim, Some(MONITORING_NAMESPACE), None)
                .await?;
            let bound = claims.iter().filter(|c| phase_of(c) == "Bound").count();
            Ok(Probe::check(
                !claims.is_empty() && bound == claims.len(),
                format!("{}/{} bound", bound, claims.len()),
            ))
        })
        .await
}

/// Configure cluster monitoring according to `plan`
pub async fn setup_monitoring(ops: &ClusterOps<'_>, plan: &MonitoringPlan, rbd_class: &str) -> Result<()> {
    match plan {
        MonitoringPlan::None => Ok(()),
        MonitoringPlan::Persistent { telemeter_url } => {
            info!("Setting up persistent monitoring on {} with {}", ops.cluster, rbd_class);
            let config = monitoring_config(Some(rbd_class), telemeter_url.as_deref())?;
            let config = config.as_str();
            retry(
                ops.poller.clock(),
                "setup_persistent_monitoring",
                MONITORING_TRIES,
                MONITORING_DELAY,
                || async move {
                    apply_monitoring_config(ops, config).await?;
                    wait_for_monitoring_claims(ops).await
                },
            )
            .await
        }
        MonitoringPlan::Telemeter { url } => {
            info!("Pointing telemeter on {} at {}", ops.cluster, url);
            apply_monitoring_config(ops, &monitoring_config(None, Some(url))?).await
        }
    }
}

/// Add the storage console plugin to the cluster console
pub async fn enable_console_plugin(ops: &ClusterOps<'_>) -> Result<()> {
    let console = ops.client.get(ResourceKind::Console, None, "cluster").await?;
    let mut plugins: Vec<Value> = console
        .pointer("/spec/plugins")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if plugins.iter().any(|p| p == CONSOLE_PLUGIN) {
        info!("Console plugin {} already enabled", CONSOLE_PLUGIN);
        return Ok(());
    }
    plugins.push(json!(CONSOLE_PLUGIN));
    ops.client
        .patch(ResourceKind::Console, None, "cluster", &json!({"spec": {"plugins": plugins}}))
        .await?;
    info!("Enabled console plugin {} on {}", CONSOLE_PLUGIN, ops.cluster);
    Ok(())
}

/// Clear the default flag of the platform storage class
pub async fn unset_default_storage_class(ops: &ClusterOps<'_>, class: Option<&str>) -> Result<()> {
    let Some(class) = class else {
        info!("Platform has no default storage class, nothing to unset");
        return Ok(());
    };
    let current = match ops.client.get(ResourceKind::StorageClass, None, class).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            info!("Storage class {} does not exist on {}, nothing to unset", class, ops.cluster);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let flag = current
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
        .and_then(Value::as_str);
    if flag == Some("false") {
        return Ok(());
    }
    ops.client
        .patch(
            ResourceKind::StorageClass,
            None,
            class,
            &json!({"metadata": {"annotations": {DEFAULT_CLASS_ANNOTATION: "false"}}}),
        )
        .await?;
    info!("Storage class {} is no longer the default", class);
    Ok(())
}

/// Let pods of `namespace` schedule on infra nodes
pub async fn clear_namespace_node_selector(ops: &ClusterOps<'_>, namespace: &str) -> Result<()> {
    ops.client
        .patch(
            ResourceKind::Namespace,
            None,
            namespace,
            &json!({"metadata": {"annotations": {NODE_SELECTOR_ANNOTATION: ""}}}),
        )
        .await?;
    Ok(())
}
