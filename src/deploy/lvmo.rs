//! LVM operator for single node clusters

use super::pods::{wait_for_pods, PodCount};
use super::storage::{ensure_storage_namespace, operator_source};
use super::DeployDeps;
use crate::cluster::ClusterOps;
use crate::error::Result;
use crate::olm::OperatorRequest;
use crate::templates;
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const LVMO_PACKAGE: &str = "odf-lvm-operator";
pub const CONTROLLER_SELECTOR: &str = "app.kubernetes.io/name=lvm-operator";
pub const TOPOLVM_CONTROLLER_SELECTOR: &str = "app.kubernetes.io/name=topolvm-controller";
pub const TOPOLVM_NODE_SELECTOR: &str = "app.kubernetes.io/name=topolvm-node";
pub const VG_MANAGER_SELECTOR: &str = "app.lvm.openshift.io=vg-manager";
const LVMO_POD_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn deploy_lvmo(ops: &ClusterOps<'_>, deps: &DeployDeps<'_>) -> Result<()> {
    let plan = deps.plan;
    let namespace = plan.namespace.as_str();
    info!("Installing LVMO version {} on {}", plan.ocs_version, ops.cluster);

    let source = operator_source(ops, deps).await?;
    ensure_storage_namespace(ops, plan).await?;
    ops.installer()
        .install(&OperatorRequest::new(LVMO_PACKAGE, namespace, source.as_str()))
        .await?;
    wait_for_pods(ops, namespace, CONTROLLER_SELECTOR, PodCount::Exactly(1), LVMO_POD_TIMEOUT).await?;

    let mut cluster = templates::load(templates::LVM_CLUSTER)?;
    cluster["metadata"]["namespace"] = json!(namespace);
    ops.artifacts.record("lvm_cluster_manifest", &cluster)?;
    ops.client.create_if_absent(&cluster).await?;

    for selector in [TOPOLVM_CONTROLLER_SELECTOR, TOPOLVM_NODE_SELECTOR, VG_MANAGER_SELECTOR] {
        wait_for_pods(ops, namespace, selector, PodCount::Exactly(1), LVMO_POD_TIMEOUT).await?;
    }
    info!("LVMO installed on {} from {}", ops.cluster, source);
    Ok(())
}
