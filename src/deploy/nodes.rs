//! Storage node selection
//!
//! Workers are grouped by zone and picked so the storage nodes spread over
//! as many zones as possible. Arbiter clusters take exactly two nodes per
//! data zone and keep a third zone free for the arbiter monitor.

use crate::cluster::ClusterOps;
use crate::document::name_of;
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use crate::plan::{ArbiterPlan, NodePlan};
use crate::platform::local_storage::STORAGE_NODE_LABEL;
use crate::platform::{MASTER_SELECTOR, WORKER_SELECTOR, ZONE_LABEL};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::info;

pub const INFRA_NODE_LABEL: &str = "node-role.kubernetes.io/infra";
pub const STORAGE_TAINT_KEY: &str = "node.ocs.openshift.io/storage";
const DEFAULT_NODES_TO_LABEL: usize = 3;
const ARBITER_NODES_TO_LABEL: usize = 4;
const ARBITER_NODES_PER_ZONE: usize = 2;

fn zone_of(node: &Value) -> Option<&str> {
    node.pointer("/metadata/labels")
        .and_then(|labels| labels.get(ZONE_LABEL))
        .and_then(Value::as_str)
}

fn has_label(node: &Value, key: &str) -> bool {
    node.pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map_or(false, |labels| labels.contains_key(key))
}

/// Worker names grouped by zone, zones in first-seen order
fn group_by_zone(workers: &[Value]) -> Vec<(String, Vec<String>)> {
    let mut zones: Vec<(String, Vec<String>)> = Vec::new();
    for worker in workers {
        let zone = zone_of(worker).unwrap_or_default().to_string();
        let name = name_of(worker).to_string();
        match zones.iter_mut().find(|(z, _)| *z == zone) {
            Some((_, names)) => names.push(name),
            None => zones.push((zone, vec![name])),
        }
    }
    zones
}

/// How many nodes get the storage label
pub fn nodes_to_label(plan: &NodePlan, arbiter: Option<&ArbiterPlan>) -> usize {
    match arbiter {
        Some(_) => plan.to_label.unwrap_or(ARBITER_NODES_TO_LABEL),
        None => plan.to_label.unwrap_or(DEFAULT_NODES_TO_LABEL),
    }
}

/// Order workers for labelling: spread across zones, arbiter aware
pub fn distribute_workers(workers: &[Value], plan: &NodePlan, arbiter: Option<&ArbiterPlan>) -> Result<Vec<String>> {
    if workers.is_empty() {
        return Err(Error::UnavailableResource("No worker node found!".into()));
    }
    let zones = group_by_zone(workers);
    let to_label = nodes_to_label(plan, arbiter);

    let distributed: Vec<String> = match arbiter {
        Some(arbiter) if arbiter.autodetect => zones
            .iter()
            .filter(|(_, names)| names.len() > 1)
            .flat_map(|(_, names)| names.iter().take(ARBITER_NODES_PER_ZONE).cloned())
            .collect(),
        Some(_) => {
            if plan.worker_zones.is_empty() {
                return Err(Error::Configuration(
                    "worker_availability_zones is required for an arbiter deployment".into(),
                ));
            }
            let per_zone = to_label / plan.worker_zones.len();
            let mut picked = Vec::new();
            for wanted in &plan.worker_zones {
                let names = zones
                    .iter()
                    .find(|(zone, _)| zone.ends_with(wanted.as_str()))
                    .map(|(_, names)| names.as_slice())
                    .unwrap_or_default();
                if names.len() < ARBITER_NODES_PER_ZONE {
                    return Err(Error::UnavailableResource(format!(
                        "at least {} worker nodes required in zone {} for an arbiter cluster",
                        ARBITER_NODES_PER_ZONE, wanted
                    )));
                }
                picked.extend(names.iter().take(per_zone).cloned());
            }
            picked
        }
        None => {
            let mut queues: Vec<std::collections::VecDeque<String>> = zones
                .into_iter()
                .map(|(_, names)| names.into_iter().collect())
                .collect();
            let mut picked = Vec::with_capacity(workers.len());
            while queues.iter().any(|q| !q.is_empty()) {
                for queue in queues.iter_mut() {
                    if let Some(name) = queue.pop_front() {
                        picked.push(name);
                    }
                }
            }
            picked
        }
    };

    if distributed.len() < to_label || distributed.len() < plan.to_taint {
        return Err(Error::UnavailableResource(format!(
            "Not enough distributed worker nodes: {} to label: {} or taint: {}!",
            distributed.len(),
            to_label,
            plan.to_taint
        )));
    }
    Ok(distributed)
}

fn storage_taint() -> Value {
    json!({"key": STORAGE_TAINT_KEY, "value": "true", "effect": "NoSchedule"})
}

/// Label and taint the storage workers; returns the labelled node names
pub async fn label_and_taint(ops: &ClusterOps<'_>, plan: &NodePlan, arbiter: Option<&ArbiterPlan>) -> Result<Vec<String>> {
    let workers = ops
        .client
        .list(ResourceKind::Node, None, Some(WORKER_SELECTOR))
        .await?;
    let distributed = distribute_workers(&workers, plan, arbiter)?;
    let to_label = nodes_to_label(plan, arbiter);

    let mut labels = json!({STORAGE_NODE_LABEL: ""});
    if plan.infra_nodes && !plan.infra_replicas {
        labels[INFRA_NODE_LABEL] = json!("");
    }
    let labelled: Vec<String> = distributed.iter().take(to_label).cloned().collect();
    for name in &labelled {
        info!("Labeling node {} as storage node", name);
        ops.client
            .patch(
                ResourceKind::Node,
                None,
                name,
                &json!({"metadata": {"labels": labels}}),
            )
            .await?;
    }

    for name in distributed.iter().take(plan.to_taint) {
        let node = ops.client.get(ResourceKind::Node, None, name).await?;
        let mut taints: Vec<Value> = node
            .pointer("/spec/taints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if taints.iter().any(|t| t["key"] == STORAGE_TAINT_KEY) {
            continue;
        }
        info!("Tainting node {} with {}", name, STORAGE_TAINT_KEY);
        taints.push(storage_taint());
        ops.client
            .patch(ResourceKind::Node, None, name, &json!({"spec": {"taints": taints}}))
            .await?;
    }
    Ok(labelled)
}

/// Number of distinct zones carried by worker nodes; `None` when no worker
/// has a zone label
pub async fn worker_zone_count(ops: &ClusterOps<'_>) -> Result<Option<usize>> {
    let nodes = ops.client.list(ResourceKind::Node, None, None).await?;
    let zones: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| has_label(n, WORKER_SELECTOR))
        .filter_map(zone_of)
        .collect();
    Ok((!zones.is_empty()).then_some(zones.len()))
}

/// Zone that hosts the arbiter monitor.
///
/// With autodetection this is the first master zone that carries no storage
/// worker; otherwise the configured zone.
pub async fn arbiter_location(ops: &ClusterOps<'_>, arbiter: &ArbiterPlan) -> Result<String> {
    if !arbiter.autodetect {
        return arbiter
            .zone
            .clone()
            .ok_or_else(|| Error::Configuration("arbiter_zone is not set".into()));
    }
    let nodes = ops.client.list(ResourceKind::Node, None, None).await?;
    let storage_zones: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| has_label(n, WORKER_SELECTOR) && has_label(n, STORAGE_NODE_LABEL))
        .filter_map(zone_of)
        .collect();
    let master_zones: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| has_label(n, MASTER_SELECTOR))
        .filter_map(zone_of)
        .collect();
    let location = master_zones
        .difference(&storage_zones)
        .next()
        .map(|zone| zone.to_string())
        .ok_or_else(|| {
            Error::UnavailableResource(
                "at least one master zone without storage nodes is required to host the arbiter".into(),
            )
        })?;
    info!("Arbiter location on {}: {} (storage zones {:?})", ops.cluster, location, storage_zones);
    Ok(location)
}
