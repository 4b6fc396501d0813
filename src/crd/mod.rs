//! Custom resource types written by the orchestrator
//!
//! - OLM: Subscription, InstallPlan, CatalogSource, OperatorGroup,
//!   ImageContentSourcePolicy
//! - Regional DR: MirrorPeer, DRPolicy

pub mod dr;
pub mod olm;

pub use dr::*;
pub use olm::*;

use crate::error::Result;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;

/// Serialize a typed resource into a manifest, placing it in `namespace`
pub fn to_manifest<K>(mut resource: K, namespace: Option<&str>) -> Result<Value>
where
    K: Resource + Serialize,
{
    if let Some(ns) = namespace {
        resource.meta_mut().namespace = Some(ns.to_string());
    }
    Ok(serde_json::to_value(&resource)?)
}
